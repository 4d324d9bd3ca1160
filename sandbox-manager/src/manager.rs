//! Sandbox process manager.
//!
//! Brings the sandbox to a reachable state and tears it down again, whether this manager spawned
//! the process or adopted a sandbox that was already listening on the port.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

use crate::{
    config::SandboxConfig,
    error::SandboxError,
    health::{HealthProbe, NodeInfo, ProbeError, PxeClient},
    process::{CommandLauncher, Launcher, ProcessEvent, ProcessHandle, Spawned},
    signals::{ShutdownTarget, SignalCoordinator},
    timers::{TimerName, TimerSet},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, derive_more::Display)]
pub enum Phase {
    #[default]
    #[display("idle")]
    Idle,
    #[display("starting")]
    Starting,
    #[display("ready")]
    Ready,
    #[display("stopping")]
    Stopping,
}

#[derive(Debug, Default)]
struct ManagerState {
    phase: Phase,
    ready: bool,
    /// Adopted a sandbox this manager does not own. Never signalled.
    external: bool,
    process: Option<ProcessHandle>,
}

/// Point-in-time view of a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSnapshot {
    pub phase: Phase,
    pub ready: bool,
    pub external: bool,
    pub has_process: bool,
    pub pending_timers: Vec<TimerName>,
}

impl ManagerSnapshot {
    /// Whether the manager looks exactly as it did right after construction.
    pub fn is_initial(&self) -> bool {
        self.phase == Phase::Idle
            && !self.ready
            && !self.external
            && !self.has_process
            && self.pending_timers.is_empty()
    }
}

enum StopAction {
    Nothing,
    Disconnect,
    Reset,
    AwaitExit(ProcessHandle),
    Terminate(ProcessHandle),
}

struct Shared<L, P> {
    config: SandboxConfig,
    launcher: L,
    probe: P,
    coordinator: SignalCoordinator,
    state: Mutex<ManagerState>,
    timers: TimerSet,
    /// Wakes a pending `start()` once `stop()` took over.
    stop_requested: Notify,
    this: Weak<dyn ShutdownTarget>,
}

/// Manages one sandbox.
///
/// # Example
///
/// ```ignore
/// use sandbox_manager::{SandboxConfig, SandboxManager};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = SandboxManager::from_config(SandboxConfig::default())?;
///     let info = manager.start().await?;
///     println!("sandbox {} ready", info.node_version);
///
///     // run the contract tests
///
///     manager.stop().await;
///     Ok(())
/// }
/// ```
pub struct SandboxManager<L = CommandLauncher, P = PxeClient>
where
    L: Launcher,
    P: HealthProbe,
{
    shared: Arc<Shared<L, P>>,
}

impl<L, P> std::fmt::Debug for SandboxManager<L, P>
where
    L: Launcher,
    P: HealthProbe,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("url", &self.shared.config.url)
            .field("state", &self.snapshot())
            .finish()
    }
}

impl SandboxManager {
    /// Manager spawning the configured command and probing `config.url`, registered with the
    /// process-wide [`SignalCoordinator`].
    pub fn from_config(config: SandboxConfig) -> Result<Self, ProbeError> {
        let launcher = CommandLauncher::new(config.verbose);
        let probe = PxeClient::new(config.url.clone(), config.probe.clone())?;
        Ok(Self::new(config, launcher, probe, SignalCoordinator::global().clone()))
    }
}

impl<L, P> SandboxManager<L, P>
where
    L: Launcher,
    P: HealthProbe,
{
    /// Builds an idle manager and registers it as the coordinator's active instance.
    pub fn new(
        config: SandboxConfig,
        launcher: L,
        probe: P,
        coordinator: SignalCoordinator,
    ) -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<L, P>>| {
            let this: Weak<dyn ShutdownTarget> = weak.clone();
            Shared {
                config,
                launcher,
                probe,
                coordinator,
                state: Mutex::new(ManagerState::default()),
                timers: TimerSet::new(),
                stop_requested: Notify::new(),
                this,
            }
        });
        shared.coordinator.register(shared.this.clone());
        Self { shared }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.shared.config
    }

    pub fn is_ready(&self) -> bool {
        self.shared.state.lock().ready
    }

    pub fn is_external(&self) -> bool {
        self.shared.state.lock().external
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let pending_timers = self.shared.timers.pending();
        let state = self.shared.state.lock();
        ManagerSnapshot {
            phase: state.phase,
            ready: state.ready,
            external: state.external,
            has_process: state.process.is_some(),
            pending_timers,
        }
    }

    /// Whether this manager is the coordinator's active instance.
    pub fn is_registered(&self) -> bool {
        self.shared.coordinator.is_active(&self.shared.this)
    }

    /// Starts the sandbox and waits until it answers the health check.
    ///
    /// # Errors
    ///
    /// Fails with [`SandboxError::AlreadyRunning`] unless the manager is idle. Any other error
    /// leaves the manager idle again with no process and no pending timer.
    pub async fn start(&self) -> Result<NodeInfo, SandboxError> {
        self.shared.start().await
    }

    /// Stops the sandbox. A no-op when idle; an adopted sandbox is only disconnected.
    pub async fn stop(&self) {
        self.shared.stop().await
    }
}

impl<L, P> Shared<L, P>
where
    L: Launcher,
    P: HealthProbe,
{
    async fn start(&self) -> Result<NodeInfo, SandboxError> {
        let stopped = self.stop_requested.notified();
        tokio::pin!(stopped);
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Idle || state.ready || state.process.is_some() {
                return Err(SandboxError::AlreadyRunning);
            }
            state.phase = Phase::Starting;
        }
        self.coordinator.register(self.this.clone());
        info!(
            url = %self.config.url,
            program = %self.config.command.program,
            "starting sandbox"
        );

        // Every timer reports into this channel; holding a sender keeps it open
        let (fired_tx, mut fired) = mpsc::unbounded_channel();
        self.schedule(TimerName::StartupTimeout, self.config.startup_timeout, &fired_tx);

        let Spawned { handle, mut events } = match self.launcher.launch(&self.config.command) {
            Ok(spawned) => spawned,
            Err(err) => {
                return Err(self.fail(SandboxError::from_spawn(&self.config.command.program, err)));
            }
        };
        debug!(pid = ?handle.pid(), "sandbox process spawned");
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Starting {
                drop(state);
                handle.terminate();
                return Err(self.fail(SandboxError::Interrupted));
            }
            state.process = Some(handle.clone());
        }

        let mut exit = handle.clone();
        let health = self.probe.wait_ready();
        tokio::pin!(health);
        let mut conflict: Option<String> = None;

        loop {
            tokio::select! {
                biased;

                Some(event) = events.recv(), if conflict.is_none() => match event {
                    ProcessEvent::PortInUse { detail } => {
                        self.timers.cancel(TimerName::StartupTimeout);
                        warn!(%detail, "port is already in use, probing the existing sandbox");
                        handle.terminate();
                        self.state.lock().process = None;
                        self.schedule(
                            TimerName::ExternalCheck,
                            self.config.external_check_timeout,
                            &fired_tx,
                        );
                        conflict = Some(detail);
                    }
                },
                () = &mut stopped => {
                    return Err(self.fail(SandboxError::Interrupted));
                }
                status = exit.wait(), if conflict.is_none() => {
                    return Err(self.fail(SandboxError::ProcessExitedPrematurely { status }));
                }
                result = &mut health => {
                    return match result {
                        Ok(info) => self.mark_ready(info, conflict.is_some()),
                        Err(err) if conflict.is_some() => {
                            Err(self.fail(SandboxError::ExternalServiceUnresponsive {
                                url: self.config.url.clone(),
                                detail: err.to_string(),
                            }))
                        }
                        Err(err) => Err(self.fail(err.into())),
                    };
                }
                Some(timer) = fired.recv() => match timer {
                    TimerName::StartupTimeout => {
                        return Err(self.fail(SandboxError::StartupTimeout {
                            timeout: self.config.startup_timeout,
                        }));
                    }
                    TimerName::ExternalCheck => {
                        return Err(self.fail(SandboxError::ExternalServiceUnresponsive {
                            url: self.config.url.clone(),
                            detail: conflict.take().unwrap_or_default(),
                        }));
                    }
                    TimerName::ForceKill => {}
                },
            }
        }
    }

    fn mark_ready(&self, info: NodeInfo, external: bool) -> Result<NodeInfo, SandboxError> {
        let interrupted = {
            let mut state = self.state.lock();
            if state.phase == Phase::Starting {
                state.phase = Phase::Ready;
                state.ready = true;
                state.external = external;
                if external {
                    state.process = None;
                }
                false
            } else {
                true
            }
        };
        if interrupted {
            return Err(self.fail(SandboxError::Interrupted));
        }
        self.timers.cancel_all();

        if external {
            info!(node_version = %info.node_version, "connected to existing external sandbox");
        } else {
            info!(node_version = %info.node_version, "started our own sandbox process");
        }
        Ok(info)
    }

    async fn stop(&self) {
        let action = {
            let mut state = self.state.lock();
            if state.phase == Phase::Idle {
                StopAction::Nothing
            } else if state.external {
                StopAction::Disconnect
            } else {
                match state.process.clone() {
                    None => StopAction::Reset,
                    Some(handle) if state.phase == Phase::Stopping => StopAction::AwaitExit(handle),
                    Some(handle) => {
                        state.phase = Phase::Stopping;
                        StopAction::Terminate(handle)
                    }
                }
            }
        };
        if !matches!(action, StopAction::Nothing) {
            self.stop_requested.notify_waiters();
        }

        match action {
            StopAction::Nothing => {}
            StopAction::Disconnect => {
                info!("disconnecting from external sandbox");
                self.reset();
            }
            StopAction::Reset => self.reset(),
            StopAction::AwaitExit(mut handle) => {
                handle.wait().await;
            }
            StopAction::Terminate(mut handle) => {
                info!(pid = ?handle.pid(), "stopping sandbox process");
                let killer = handle.clone();
                self.timers.schedule(TimerName::ForceKill, self.config.force_kill_timeout, move || {
                    warn!(pid = ?killer.pid(), "force killing sandbox process");
                    if !killer.kill() {
                        debug!("sandbox supervisor already gone");
                    }
                });
                if !handle.terminate() {
                    debug!("sandbox supervisor already gone");
                }
                let status = handle.wait().await;
                info!(%status, "sandbox process exited");
                self.reset();
            }
        }
    }

    fn schedule(&self, name: TimerName, delay: Duration, fired: &mpsc::UnboundedSender<TimerName>) {
        let fired = fired.clone();
        self.timers.schedule(name, delay, move || {
            let _ = fired.send(name);
        });
    }

    // Cleans up after a failed `start()` and logs. Returns `err` for the caller to surface.
    //
    // While Starting this terminates an owned process and resets. Once `stop()` took over it owns
    // the process, the force-kill timer and the final reset.
    fn fail(&self, err: SandboxError) -> SandboxError {
        let (phase, owned) = {
            let state = self.state.lock();
            let owned = if state.external { None } else { state.process.clone() };
            (state.phase, owned)
        };
        match phase {
            Phase::Starting => {
                if let Some(process) = owned {
                    if process.exit_status().is_none() && !process.terminate() {
                        debug!("sandbox supervisor already gone");
                    }
                }
                self.reset();
            }
            Phase::Stopping => {
                self.timers.cancel(TimerName::StartupTimeout);
                self.timers.cancel(TimerName::ExternalCheck);
            }
            // Already reset by `stop()`
            Phase::Idle | Phase::Ready => {}
        }

        if self.config.verbose {
            error!(context = err.context(), error = %err, "sandbox start failed");
        } else {
            debug!(context = err.context(), error = %err, "sandbox start failed");
        }
        err
    }

    // Back to the shape of a freshly built manager.
    fn reset(&self) {
        self.timers.cancel_all();
        *self.state.lock() = ManagerState::default();
        self.coordinator.clear(&self.this);
    }
}

impl<L, P> ShutdownTarget for Shared<L, P>
where
    L: Launcher,
    P: HealthProbe,
{
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.stop())
    }
}

/// Builds a manager from `config` and starts it.
pub async fn start_sandbox(config: SandboxConfig) -> Result<SandboxManager, SandboxError> {
    let manager = SandboxManager::from_config(config)?;
    manager.start().await?;
    Ok(manager)
}
