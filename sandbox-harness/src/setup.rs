//! Global setup and teardown around a test run.

use sandbox_manager::{
    HealthProbe, Launcher, NodeInfo, ProbeConfig, PxeClient, SandboxManager, SignalCoordinator,
    check_cli_version,
};
use tracing::{error, info};

use crate::{
    config::{HarnessConfig, pxe_url},
    error::HarnessError,
};

/// Installs the SIGINT/SIGTERM handlers, checks the CLI version, then starts the sandbox
/// described by `config`.
///
/// The returned manager must be handed to [`teardown`] once the suite is done.
pub async fn setup(config: &HarnessConfig) -> Result<SandboxManager, HarnessError> {
    SignalCoordinator::global().install().map_err(HarnessError::Signals)?;
    let manager = SandboxManager::from_config(config.sandbox_config())?;
    setup_with(config, manager).await
}

/// [`setup`] with a manager built by the caller.
pub async fn setup_with<L, P>(
    config: &HarnessConfig,
    manager: SandboxManager<L, P>,
) -> Result<SandboxManager<L, P>, HarnessError>
where
    L: Launcher,
    P: HealthProbe,
{
    info!("setting up aztec testing environment");

    // Step 1
    match &config.aztec_version {
        Some(expected) => {
            check_cli_version(&manager.config().command.program, expected).await?;
        }
        None => info!("no aztec version pinned, skipping version check"),
    }

    // Step 2
    let node = manager.start().await?;
    info!(
        url = %manager.config().url,
        node_version = %node.node_version,
        "aztec testing environment ready"
    );
    Ok(manager)
}

/// Stops the sandbox started by [`setup`]. Never fails; problems are only logged.
pub async fn teardown<L, P>(manager: Option<&SandboxManager<L, P>>)
where
    L: Launcher,
    P: HealthProbe,
{
    info!("cleaning up aztec testing environment");
    match manager {
        Some(manager) => {
            manager.stop().await;
            if manager.snapshot().is_initial() {
                info!("sandbox stopped");
            } else {
                error!(state = ?manager.snapshot(), "sandbox did not return to idle");
            }
        }
        None => info!("no sandbox manager found, skipping cleanup"),
    }
    info!("aztec testing environment cleanup complete");
}

/// Waits until the PXE at `url` answers and returns a client for it.
pub async fn connect(
    url: &str,
    probe: ProbeConfig,
) -> Result<(PxeClient, NodeInfo), HarnessError> {
    let client = PxeClient::new(url, probe)?;
    let node = client.wait_ready().await?;
    Ok((client, node))
}

/// [`connect`] to the PXE of instance `id`, see [`pxe_url`].
pub async fn connect_pxe(
    id: u16,
    probe: ProbeConfig,
) -> Result<(PxeClient, NodeInfo), HarnessError> {
    connect(&pxe_url(id), probe).await
}
