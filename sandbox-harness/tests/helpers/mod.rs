// Test Helpers
use sandbox_manager::{
    ExitInfo, HealthProbe, Launcher, NodeInfo, ProbeError, SandboxCommand, SandboxConfig,
    SandboxManager, SignalCoordinator, Spawned,
    process::{Control, process_channel},
};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[allow(dead_code)]
pub const NODE_VERSION: &str = "0.87.2";

/// Launcher whose processes run until terminated or killed.
#[derive(Clone, Default)]
pub struct StubLauncher {
    launches: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl StubLauncher {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl Launcher for StubLauncher {
    fn launch(&self, _command: &SandboxCommand) -> io::Result<Spawned> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let (spawned, mut driver) = process_channel(Some(1));
        tokio::spawn(async move {
            let status = match driver.next_control().await {
                Some(Control::Terminate) => ExitInfo::new(None, Some(15)),
                Some(Control::Kill) | None => ExitInfo::new(None, Some(9)),
            };
            driver.report_exit(status);
        });
        Ok(spawned)
    }
}

/// Probe answering right away.
#[derive(Clone, Default)]
pub struct ReadyProbe;

impl HealthProbe for ReadyProbe {
    fn url(&self) -> &str {
        "http://localhost:8080"
    }

    async fn node_info(&self) -> Result<NodeInfo, ProbeError> {
        Ok(NodeInfo::new(NODE_VERSION))
    }

    async fn wait_ready(&self) -> Result<NodeInfo, ProbeError> {
        self.node_info().await
    }
}

#[allow(dead_code)]
pub type StubManager = SandboxManager<StubLauncher, ReadyProbe>;

#[allow(dead_code)]
pub fn stub_manager(config: SandboxConfig, launcher: &StubLauncher) -> StubManager {
    SandboxManager::new(config, launcher.clone(), ReadyProbe, SignalCoordinator::new())
}
