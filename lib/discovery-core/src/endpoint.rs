//! Endpoint management and key layout
//!
//! Keys follow `{root}/{service}/{instance}`; the service name is the
//! parent segment of the key and the instance id is the last one.

/// A dialed backend instance owned by the registry
#[derive(Clone, Debug)]
pub struct Endpoint<C> {
    pub key: String,
    pub address: String,
    pub conn: C,
}

impl<C> Endpoint<C> {
    pub fn new(key: impl Into<String>, address: impl Into<String>, conn: C) -> Self {
        Self {
            key: key.into(),
            address: address.into(),
            conn,
        }
    }

    /// Service name derived from the key, if the key is well formed
    pub fn service_name(&self) -> Option<&str> {
        split_key(&self.key).map(|(service, _)| service)
    }

    /// Instance id derived from the key, if the key is well formed
    pub fn instance_id(&self) -> Option<&str> {
        split_key(&self.key).map(|(_, id)| id)
    }
}

/// Strip a trailing separator so `/a/b/` and `/a/b` name the same node
pub fn normalize_key(key: &str) -> &str {
    key.trim_end_matches('/')
}

/// Split a key into `(service, instance)`
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (parent, id) = normalize_key(key).rsplit_once('/')?;
    let service = parent.rsplit('/').next()?;
    if service.is_empty() || id.is_empty() {
        return None;
    }
    Some((service, id))
}

/// Whether `key` sits exactly at `{root}/{service}/{instance}`
pub fn is_instance_key(root: &str, key: &str) -> bool {
    let root = normalize_key(root);
    normalize_key(key)
        .strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|rest| {
            let mut segments = rest.split('/');
            matches!(
                (segments.next(), segments.next(), segments.next()),
                (Some(service), Some(id), None) if !service.is_empty() && !id.is_empty()
            )
        })
        .unwrap_or(false)
}
