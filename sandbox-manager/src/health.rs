//! Readiness probe against the sandbox's PXE endpoint.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::ProbeConfig;

/// Metadata the sandbox reports once it is ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_version: String,
    /// Every other field of the response, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl NodeInfo {
    pub fn new(node_version: impl Into<String>) -> Self {
        Self { node_version: node_version.into(), extra: serde_json::Map::new() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("sandbox at {url} not ready after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<ProbeError>,
    },
}

/// Readiness probe used by the manager.
pub trait HealthProbe: Send + Sync + 'static {
    /// Endpoint being probed.
    fn url(&self) -> &str;

    /// Single request for the node metadata.
    fn node_info(&self) -> impl Future<Output = Result<NodeInfo, ProbeError>> + Send;

    /// Retries [`HealthProbe::node_info`] until it succeeds or the probe gives up.
    fn wait_ready(&self) -> impl Future<Output = Result<NodeInfo, ProbeError>> + Send;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<NodeInfo>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC client for the PXE `getNodeInfo` call.
#[derive(Debug, Clone)]
pub struct PxeClient {
    url: String,
    config: ProbeConfig,
    client: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl PxeClient {
    pub fn new(url: impl Into<String>, config: ProbeConfig) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ProbeError::Client)?;
        Ok(Self { url: url.into(), config, client, next_id: Arc::new(AtomicU64::new(1)) })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }
}

impl HealthProbe for PxeClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn node_info(&self) -> Result<NodeInfo, ProbeError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": self.config.rpc_method,
            "params": [],
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|source| ProbeError::Transport { url: self.url.clone(), source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status { url: self.url.clone(), status: status.as_u16() });
        }

        let envelope: RpcResponse =
            response.json().await.map_err(|e| ProbeError::Malformed(e.to_string()))?;
        match envelope {
            RpcResponse { error: Some(error), .. } => {
                Err(ProbeError::Rpc { code: error.code, message: error.message })
            }
            RpcResponse { result: Some(info), .. } => Ok(info),
            RpcResponse { result: None, error: None } => {
                Err(ProbeError::Malformed("neither result nor error in response".to_string()))
            }
        }
    }

    async fn wait_ready(&self) -> Result<NodeInfo, ProbeError> {
        let started = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.node_info().await {
                Ok(info) => {
                    info!(
                        node_version = %info.node_version,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "sandbox ready"
                    );
                    return Ok(info);
                }
                Err(err) => {
                    if self.config.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(ProbeError::Exhausted {
                            url: self.url.clone(),
                            attempts,
                            last: Box::new(err),
                        });
                    }
                    debug!(
                        url = %self.url,
                        attempt = attempts,
                        error = %err,
                        "sandbox not ready yet"
                    );
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_info_keeps_unknown_fields() {
        let info: NodeInfo = serde_json::from_value(json!({
            "nodeVersion": "0.87.2",
            "l1ChainId": 31337,
            "rollupVersion": 1
        }))
        .unwrap();
        assert_eq!(info.node_version, "0.87.2");
        assert_eq!(info.extra["l1ChainId"], 31337);
        assert_eq!(info.extra.len(), 2);
    }

    #[test]
    fn test_node_info_requires_a_version() {
        let result: Result<NodeInfo, _> = serde_json::from_value(json!({ "l1ChainId": 1 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_exhausted_error_names_the_endpoint() {
        let err = ProbeError::Exhausted {
            url: "http://localhost:8080".to_string(),
            attempts: 3,
            last: Box::new(ProbeError::Status {
                url: "http://localhost:8080".to_string(),
                status: 503,
            }),
        };
        assert_eq!(
            err.to_string(),
            "sandbox at http://localhost:8080 not ready after 3 attempts: \
             http://localhost:8080 answered with HTTP 503"
        );
    }
}
