//! HTTP client for the etcd v2 keys API

use discovery_core::{DiscoveryConfig, DiscoveryError, Node};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const ERROR_KEY_NOT_FOUND: u64 = 100;
pub const ERROR_EVENT_INDEX_CLEARED: u64 = 401;

/// TCP keepalive on store connections, so a half-open long poll errors out
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum EtcdError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("etcd error {code}: {message} ({cause})")]
    Api {
        code: u64,
        message: String,
        cause: String,
    },

    #[error("Unexpected response (HTTP {status}): {reason}")]
    Decode { status: u16, reason: String },

    #[error("No etcd endpoints configured")]
    NoEndpoints,
}

impl EtcdError {
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, EtcdError::Api { code, .. } if *code == ERROR_KEY_NOT_FOUND)
    }
}

impl From<EtcdError> for DiscoveryError {
    fn from(e: EtcdError) -> Self {
        DiscoveryError::Store(e.to_string())
    }
}

/// Body of a successful keys API call
#[derive(Clone, Debug, Deserialize)]
pub struct KeysResponse {
    pub action: String,
    pub node: Node,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: u64,
    message: String,
    #[serde(default)]
    cause: String,
}

/// EtcdClient talks to an etcd cluster, failing over between endpoints
pub struct EtcdClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    request_timeout: Duration,
}

impl EtcdClient {
    /// Create a new etcd client for the given endpoints
    pub fn new(endpoints: Vec<String>, request_timeout: Duration) -> Result<Self, EtcdError> {
        if endpoints.is_empty() {
            return Err(EtcdError::NoEndpoints);
        }

        // No overall timeout on the client: watches are long polls
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .tcp_keepalive(TCP_KEEPALIVE)
            .build()?;

        Ok(Self {
            http,
            endpoints,
            request_timeout,
        })
    }

    /// Create a client from discovery configuration
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, EtcdError> {
        Self::new(config.etcd_endpoints.clone(), config.store_timeout)
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// GET a key, trying each endpoint until one answers.
    ///
    /// etcd-level errors come from a reachable cluster and are returned
    /// without trying further endpoints.
    pub async fn get(
        &self,
        key: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<KeysResponse, EtcdError> {
        let mut last_error = EtcdError::NoEndpoints;

        for endpoint in &self.endpoints {
            let url = keys_url(endpoint, key);
            let mut request = self.http.get(&url).query(query);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            debug!("GET {} {:?}", url, query);
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.bytes().await?;
                    return parse_response(status.as_u16(), status.is_success(), &body);
                }
                Err(e) => {
                    warn!("etcd endpoint {} unreachable: {}", endpoint, e);
                    last_error = e.into();
                }
            }
        }

        Err(last_error)
    }
}

/// Build the keys API URL for `key` on `endpoint`
pub fn keys_url(endpoint: &str, key: &str) -> String {
    format!(
        "{}/v2/keys/{}",
        endpoint.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

/// Decode a keys API response body
pub fn parse_response(status: u16, success: bool, body: &[u8]) -> Result<KeysResponse, EtcdError> {
    if success {
        return serde_json::from_slice(body).map_err(|e| EtcdError::Decode {
            status,
            reason: e.to_string(),
        });
    }

    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(error) => Err(EtcdError::Api {
            code: error.error_code,
            message: error.message,
            cause: error.cause,
        }),
        Err(_) => Err(EtcdError::Decode {
            status,
            reason: String::from_utf8_lossy(body).trim().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_url() {
        assert_eq!(
            keys_url("http://127.0.0.1:2379", "/backends"),
            "http://127.0.0.1:2379/v2/keys/backends"
        );
        assert_eq!(
            keys_url("http://10.0.0.1:2379/", "backends/auth"),
            "http://10.0.0.1:2379/v2/keys/backends/auth"
        );
    }

    #[test]
    fn test_parse_listing() {
        let body = br#"{
            "action": "get",
            "node": {
                "key": "/backends",
                "dir": true,
                "nodes": [
                    {
                        "key": "/backends/auth",
                        "dir": true,
                        "nodes": [
                            {"key": "/backends/auth/1", "value": ":50051", "modifiedIndex": 9, "createdIndex": 9}
                        ],
                        "modifiedIndex": 8,
                        "createdIndex": 8
                    }
                ]
            }
        }"#;
        let response = parse_response(200, true, body).unwrap();
        assert_eq!(response.action, "get");
        assert_eq!(response.node.nodes[0].nodes[0].key, "/backends/auth/1");
    }

    #[test]
    fn test_parse_watch_delete() {
        let body = br#"{
            "action": "delete",
            "node": {"key": "/backends/auth/1", "modifiedIndex": 12, "createdIndex": 9},
            "prevNode": {"key": "/backends/auth/1", "value": ":50051", "modifiedIndex": 9, "createdIndex": 9}
        }"#;
        let response = parse_response(200, true, body).unwrap();
        assert_eq!(response.action, "delete");
        assert_eq!(response.node.value, None);
        assert_eq!(response.node.modified_index, 12);
    }

    #[test]
    fn test_parse_key_not_found() {
        let body = br#"{"errorCode":100,"message":"Key not found","cause":"/backends","index":5}"#;
        let err = parse_response(404, false, body).unwrap_err();
        assert!(err.is_key_not_found());
    }

    #[test]
    fn test_parse_index_cleared() {
        let body = br#"{"errorCode":401,"message":"The event in requested index is outdated and cleared","cause":"the requested history has been cleared [1008/4]","index":2007}"#;
        let err = parse_response(400, false, body).unwrap_err();
        assert!(matches!(
            err,
            EtcdError::Api { code: ERROR_EVENT_INDEX_CLEARED, .. }
        ));
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_response(502, false, b"bad gateway\n").unwrap_err();
        assert!(matches!(err, EtcdError::Decode { status: 502, .. }));
    }

    #[test]
    fn test_from_config_uses_store_timeout() {
        let config = DiscoveryConfig {
            etcd_endpoints: vec!["http://10.0.0.1:2379".to_string()],
            dial_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let client = EtcdClient::from_config(&config).unwrap();
        assert_eq!(client.endpoints().to_vec(), vec!["http://10.0.0.1:2379".to_string()]);
        assert_eq!(client.request_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_requires_endpoints() {
        assert!(matches!(
            EtcdClient::new(vec![], Duration::from_secs(1)),
            Err(EtcdError::NoEndpoints)
        ));
    }
}
