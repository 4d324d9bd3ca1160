// Test Helpers
use parking_lot::Mutex;
use sandbox_manager::{
    ExitInfo, HealthProbe, Launcher, NodeInfo, ProbeError, ProcessEvent, SandboxCommand,
    SandboxConfig, SandboxManager, SignalCoordinator, Spawned,
    process::{Control, ProcessDriver, process_channel},
};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, sleep};

#[allow(dead_code)]
pub const FAKE_PID: u32 = 4242;
#[allow(dead_code)]
pub const NODE_VERSION: &str = "0.87.2";

/// How a fake sandbox process behaves once launched.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Script {
    /// Runs until signalled. Exits on terminate unless `ignore_terminate`, always exits on kill.
    Run { ignore_terminate: bool },
    /// Exits on its own after `delay`.
    ExitAfter { delay: Duration, status: ExitInfo },
    /// Reports a port conflict after `delay`, then exits with code 1 right away.
    PortInUse { delay: Duration },
    /// Reports a port conflict after `delay`, then keeps running until signalled.
    PortInUseAndStay { delay: Duration },
    /// `spawn` fails with this error kind.
    SpawnError(io::ErrorKind),
}

#[allow(dead_code)]
pub const PORT_CONFLICT_LINE: &str = "Error: port is already allocated";

/// Launcher replaying a queue of scripts. The last script repeats.
#[derive(Clone)]
pub struct FakeLauncher {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    launches: Arc<AtomicUsize>,
    controls: Arc<Mutex<Vec<Control>>>,
}

#[allow(dead_code)]
impl FakeLauncher {
    pub fn new(script: Script) -> Self {
        Self::with_scripts(vec![script])
    }

    pub fn with_scripts(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            launches: Arc::new(AtomicUsize::new(0)),
            controls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Every control request received by any launched process, in order.
    pub fn controls(&self) -> Vec<Control> {
        self.controls.lock().clone()
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.scripts.lock();
        if scripts.len() > 1 {
            scripts.pop_front().unwrap()
        } else {
            scripts.front().cloned().expect("at least one script")
        }
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, _command: &SandboxCommand) -> io::Result<Spawned> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let script = self.next_script();
        if let Script::SpawnError(kind) = script {
            return Err(io::Error::new(kind, "scripted spawn failure"));
        }
        let (spawned, driver) = process_channel(Some(FAKE_PID));
        tokio::spawn(drive(script, driver, Arc::clone(&self.controls)));
        Ok(spawned)
    }
}

async fn drive(script: Script, driver: ProcessDriver, controls: Arc<Mutex<Vec<Control>>>) {
    match script {
        Script::Run { ignore_terminate } => {
            run_until_signalled(driver, controls, ignore_terminate).await
        }
        Script::ExitAfter { delay, status } => {
            sleep(delay).await;
            driver.report_exit(status);
        }
        Script::PortInUse { delay } => {
            sleep(delay).await;
            driver.send_event(ProcessEvent::PortInUse { detail: PORT_CONFLICT_LINE.to_string() });
            driver.report_exit(ExitInfo::new(Some(1), None));
        }
        Script::PortInUseAndStay { delay } => {
            sleep(delay).await;
            driver.send_event(ProcessEvent::PortInUse { detail: PORT_CONFLICT_LINE.to_string() });
            run_until_signalled(driver, controls, false).await;
        }
        Script::SpawnError(_) => unreachable!("spawn errors never launch"),
    }
}

async fn run_until_signalled(
    mut driver: ProcessDriver,
    controls: Arc<Mutex<Vec<Control>>>,
    ignore_terminate: bool,
) {
    loop {
        match driver.next_control().await {
            Some(control) => {
                controls.lock().push(control);
                match control {
                    Control::Terminate if ignore_terminate => {}
                    Control::Terminate => {
                        driver.report_exit(ExitInfo::new(None, Some(15)));
                        return;
                    }
                    Control::Kill => {
                        driver.report_exit(ExitInfo::new(None, Some(9)));
                        return;
                    }
                }
            }
            None => {
                driver.report_exit(ExitInfo::new(None, Some(9)));
                return;
            }
        }
    }
}

/// How the fake health probe answers.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum Health {
    ReadyAfter(Duration),
    FailAfter(Duration),
    Never,
}

#[derive(Clone)]
pub struct FakeProbe {
    health: Health,
    calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FakeProbe {
    pub fn new(health: Health) -> Self {
        Self { health, calls: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HealthProbe for FakeProbe {
    fn url(&self) -> &str {
        "http://localhost:8080"
    }

    async fn node_info(&self) -> Result<NodeInfo, ProbeError> {
        Ok(NodeInfo::new(NODE_VERSION))
    }

    async fn wait_ready(&self) -> Result<NodeInfo, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.health {
            Health::ReadyAfter(delay) => {
                sleep(delay).await;
                Ok(NodeInfo::new(NODE_VERSION))
            }
            Health::FailAfter(delay) => {
                sleep(delay).await;
                Err(ProbeError::Status { url: self.url().to_string(), status: 503 })
            }
            Health::Never => std::future::pending().await,
        }
    }
}

#[allow(dead_code)]
pub type FakeManager = SandboxManager<FakeLauncher, FakeProbe>;

/// Manager wired to fakes and a private signal coordinator.
#[allow(dead_code)]
pub fn fake_manager(launcher: &FakeLauncher, probe: &FakeProbe) -> FakeManager {
    fake_manager_with(SandboxConfig::default(), launcher, probe, SignalCoordinator::new())
}

#[allow(dead_code)]
pub fn fake_manager_with(
    config: SandboxConfig,
    launcher: &FakeLauncher,
    probe: &FakeProbe,
    coordinator: SignalCoordinator,
) -> FakeManager {
    SandboxManager::new(config, launcher.clone(), probe.clone(), coordinator)
}

/// Lets spawned fake tasks run without advancing a paused clock.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
