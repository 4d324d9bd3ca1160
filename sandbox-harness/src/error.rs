use std::{io, path::PathBuf};

use sandbox_manager::{ProbeError, SandboxError, VersionError};

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}
