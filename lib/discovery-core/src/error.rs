use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Service not available: {0}")]
    NotAvailable(String),

    #[error("Failed to dial {address} for {key}: {reason}")]
    DialFailed {
        key: String,
        address: String,
        reason: String,
    },

    #[error("Invalid endpoint key: {0}")]
    InvalidKey(String),

    #[error("Malformed service directory: {0}")]
    MalformedDirectory(String),

    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("Bootstrap failed: {0}")]
    BootstrapUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl DiscoveryError {
    /// Whether the caller should treat this as "try again later"
    pub fn is_not_available(&self) -> bool {
        matches!(self, DiscoveryError::NotAvailable(_))
    }
}
