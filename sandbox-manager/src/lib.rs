//! Lifecycle management for a locally-run Aztec sandbox.
//!
//! [`SandboxManager::start`] spawns `aztec start --sandbox`, polls the PXE endpoint until it
//! answers and adopts an already-running sandbox when the port is taken.
//! [`SandboxManager::stop`] terminates what the manager owns, escalating to a kill after a grace
//! period, and never touches a sandbox it adopted.

pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod process;
pub mod signals;
pub mod timers;
pub mod version;

pub use config::{ProbeConfig, SandboxCommand, SandboxConfig};
pub use error::SandboxError;
pub use health::{HealthProbe, NodeInfo, ProbeError, PxeClient};
pub use manager::{ManagerSnapshot, Phase, SandboxManager, start_sandbox};
pub use process::{CommandLauncher, ExitInfo, Launcher, ProcessEvent, ProcessHandle, Spawned};
pub use signals::{ShutdownSignal, SignalCoordinator};
pub use timers::{TimerName, TimerSet};
pub use version::{VersionError, check_cli_version};
