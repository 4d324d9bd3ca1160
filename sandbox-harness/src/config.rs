use std::path::Path;

use sandbox_manager::SandboxConfig;
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// Environment variable overriding the scheme and host of every PXE endpoint.
pub const BASE_PXE_URL_ENV: &str = "BASE_PXE_URL";
pub const DEFAULT_BASE_PXE_URL: &str = "http://localhost";
/// Port of the PXE with id 0. Instance `id` listens on `BASE_PXE_PORT + id`.
pub const BASE_PXE_PORT: u16 = 8080;

/// Harness configuration file. Every field is optional.
///
/// ```json
/// {
///   "aztec_version": "0.87.2",
///   "verbose": true,
///   "sandbox": { "startup_timeout": 240000 }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// CLI version the suite is pinned to. The version check is skipped when unset.
    pub aztec_version: Option<String>,
    pub verbose: bool,
    pub sandbox: SandboxConfig,
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| HarnessError::ConfigRead { path: path.to_path_buf(), source })?;
        serde_json::from_str(&raw)
            .map_err(|source| HarnessError::ConfigParse { path: path.to_path_buf(), source })
    }

    /// Sandbox configuration with the top-level `verbose` flag applied.
    pub fn sandbox_config(&self) -> SandboxConfig {
        let verbose = self.sandbox.verbose || self.verbose;
        self.sandbox.clone().with_verbose(verbose)
    }
}

/// PXE endpoint of instance `id`, honouring `BASE_PXE_URL`.
pub fn pxe_url(id: u16) -> String {
    pxe_url_from(std::env::var(BASE_PXE_URL_ENV).ok().as_deref(), id)
}

pub fn pxe_url_from(base: Option<&str>, id: u16) -> String {
    let base = base.filter(|base| !base.is_empty()).unwrap_or(DEFAULT_BASE_PXE_URL);
    format!("{}:{}", base.trim_end_matches('/'), u32::from(BASE_PXE_PORT) + u32::from(id))
}
