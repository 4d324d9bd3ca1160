use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Default PXE endpoint of a sandbox started with `aztec start --sandbox`.
pub const DEFAULT_PXE_URL: &str = "http://localhost:8080";

/// Stderr fragment the aztec CLI prints when the PXE port is already bound.
pub const DEFAULT_PORT_CONFLICT_MARKER: &str = "port is already";

/// The backend executable and the fixed flag set it is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Stderr fragment that identifies a port conflict. Only the launcher looks at it; the
    /// manager reacts to the structured event it produces.
    pub port_conflict_marker: String,
}

impl Default for SandboxCommand {
    fn default() -> Self {
        Self {
            program: "aztec".to_string(),
            args: vec!["start".to_string(), "--sandbox".to_string()],
            port_conflict_marker: DEFAULT_PORT_CONFLICT_MARKER.to_string(),
        }
    }
}

/// How the readiness probe talks to the PXE endpoint.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// JSON-RPC method returning the node metadata.
    pub rpc_method: String,
    /// Delay between two readiness attempts.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    /// Per-request HTTP timeout.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    /// Give up after this many failed attempts. `None` polls until the caller's own timeout.
    pub max_attempts: Option<u32>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            rpc_method: "pxe_getNodeInfo".to_string(),
            poll_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

/// Configuration of a [`crate::SandboxManager`].
///
/// Every duration is (de)serialized as milliseconds, e.g.
///
/// ```json
/// { "url": "http://localhost:8081", "startup_timeout": 60000, "verbose": true }
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Log the sandbox output and error context at info level.
    pub verbose: bool,
    /// PXE endpoint used for the health check.
    pub url: String,
    pub command: SandboxCommand,
    pub probe: ProbeConfig,
    /// Upper bound for `start()` to reach readiness.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub startup_timeout: Duration,
    /// Grace period between the termination signal and the kill signal in `stop()`.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub force_kill_timeout: Duration,
    /// Upper bound for an already-running sandbox to answer after a port conflict.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub external_check_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            url: DEFAULT_PXE_URL.to_string(),
            command: SandboxCommand::default(),
            probe: ProbeConfig::default(),
            startup_timeout: Duration::from_millis(180_000),
            force_kill_timeout: Duration::from_millis(5_000),
            external_check_timeout: Duration::from_millis(10_000),
        }
    }
}

impl SandboxConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
