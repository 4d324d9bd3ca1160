//! Checks that the installed sandbox CLI matches the version the test suite pins.

use std::{io, process::Output};

use tokio::process::Command;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    #[error("`{program}` not found, install aztec-up and run: VERSION={expected} aztec-up")]
    CliNotFound { program: String, expected: String },
    #[error(
        "version mismatch: expected {expected}, installed {installed}; \
         run: VERSION={expected} aztec-up"
    )]
    Mismatch { expected: String, installed: String },
    #[error("failed to run `{program} --version`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program} --version` failed without printing a version: {stderr}")]
    NoVersion { program: String, stderr: String },
}

/// Runs `<program> --version` and compares its output with `expected`.
///
/// A non-zero exit still counts when a version was printed; the aztec CLI does that while a
/// sandbox is running. Returns the installed version.
pub async fn check_cli_version(program: &str, expected: &str) -> Result<String, VersionError> {
    info!(%program, %expected, "checking CLI version");

    let output = Command::new(program).arg("--version").output().await.map_err(|source| {
        match source.kind() {
            io::ErrorKind::NotFound => VersionError::CliNotFound {
                program: program.to_string(),
                expected: expected.to_string(),
            },
            _ => VersionError::Io { program: program.to_string(), source },
        }
    })?;

    let installed = installed_version(program, &output)?;
    compare_versions(expected, &installed)?;
    info!(%installed, "CLI version check passed");
    Ok(installed)
}

fn installed_version(program: &str, output: &Output) -> Result<String, VersionError> {
    let installed = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if installed.is_empty() && !output.status.success() {
        return Err(VersionError::NoVersion {
            program: program.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(installed)
}

/// Exact match after trimming both sides.
pub fn compare_versions(expected: &str, installed: &str) -> Result<(), VersionError> {
    if expected.trim() == installed.trim() {
        Ok(())
    } else {
        Err(VersionError::Mismatch {
            expected: expected.trim().to_string(),
            installed: installed.trim().to_string(),
        })
    }
}
