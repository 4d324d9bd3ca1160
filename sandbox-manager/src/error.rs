use std::time::Duration;

use crate::health::ProbeError;
use crate::process::ExitInfo;

/// Install step suggested when the aztec CLI is missing.
pub const INSTALL_HINT: &str = "install it with aztec-up";

/// Why a [`crate::SandboxManager::start`] call failed.
///
/// Apart from [`SandboxError::AlreadyRunning`], which leaves the running sandbox alone, the
/// manager is back in its initial state when the error is returned.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("cannot start sandbox: already running or starting")]
    AlreadyRunning,
    #[error("`{program}` not found, {hint}")]
    ExecutableNotFound { program: String, hint: String },
    #[error("sandbox process exited before it was ready ({status})")]
    ProcessExitedPrematurely { status: ExitInfo },
    #[error("port is in use at {url} but the sandbox there is not responsive")]
    ExternalServiceUnresponsive { url: String, detail: String },
    #[error("sandbox startup timed out after {} seconds", .timeout.as_secs())]
    StartupTimeout { timeout: Duration },
    #[error("failed to spawn sandbox process: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error("failed to connect to sandbox: {0}")]
    HealthCheckFailed(#[from] ProbeError),
    #[error("sandbox startup interrupted by stop()")]
    Interrupted,
}

impl SandboxError {
    /// Maps a spawn failure of `program` onto the taxonomy.
    pub fn from_spawn(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::ExecutableNotFound {
                program: program.to_string(),
                hint: INSTALL_HINT.to_string(),
            },
            _ => Self::SpawnFailed(err),
        }
    }

    /// Short label of the failing stage, used as a structured log field.
    pub fn context(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "start",
            Self::ExecutableNotFound { .. } | Self::SpawnFailed(_) => "process-spawn",
            Self::ProcessExitedPrematurely { .. } => "process-exit",
            Self::ExternalServiceUnresponsive { .. } => "external-sandbox-check",
            Self::StartupTimeout { .. } => "startup-timeout",
            Self::HealthCheckFailed(_) => "connectivity-check",
            Self::Interrupted => "stop",
        }
    }
}
