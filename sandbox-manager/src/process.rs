//! Process primitive the manager drives.
//!
//! A [`Launcher`] turns a [`SandboxCommand`] into a [`Spawned`] pair: a clonable
//! [`ProcessHandle`] used to signal the process and observe its exit, plus a stream of
//! structured [`ProcessEvent`]s. [`CommandLauncher`] backs this with a tokio child process;
//! [`process_channel`] lets any other implementation drive the same contract.

use std::{fmt, io, process::Stdio, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::config::SandboxCommand;

/// How long the supervisor waits for the output readers to drain once the child exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Grace period for an abandoned process that was already asked to terminate.
const ORPHAN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Exit status of a sandbox process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminating signal number, unix only.
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub const fn new(code: Option<i32>, signal: Option<i32>) -> Self {
        Self { code, signal }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self { code: status.code(), signal }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Structured notification from a running sandbox process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The process could not bind its listening port; another service already holds it.
    PortInUse { detail: String },
}

/// Requests a [`ProcessHandle`] forwards to whoever supervises the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Graceful termination (SIGTERM on unix).
    Terminate,
    /// Forceful termination (SIGKILL on unix).
    Kill,
}

/// Clonable handle to a spawned process.
///
/// When every handle is dropped the supervisor kills the process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    control: mpsc::UnboundedSender<Control>,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Asks the process to shut down. Returns `false` once the supervisor is gone.
    pub fn terminate(&self) -> bool {
        self.control.send(Control::Terminate).is_ok()
    }

    /// Kills the process. Returns `false` once the supervisor is gone.
    pub fn kill(&self) -> bool {
        self.control.send(Control::Kill).is_ok()
    }

    /// Exit status if the process already exited.
    pub fn exit_status(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    /// Waits for the process to exit. Cancel safe.
    pub async fn wait(&mut self) -> ExitInfo {
        loop {
            if let Some(status) = *self.exit.borrow_and_update() {
                return status;
            }
            if self.exit.changed().await.is_err() {
                // Supervisor vanished without reporting: nothing left to wait for
                return self.exit.borrow().unwrap_or_default();
            }
        }
    }
}

/// A freshly launched process as seen by the manager.
#[derive(Debug)]
pub struct Spawned {
    pub handle: ProcessHandle,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

/// The supervising side of a [`Spawned`] pair.
#[derive(Debug)]
pub struct ProcessDriver {
    control: mpsc::UnboundedReceiver<Control>,
    exit: watch::Sender<Option<ExitInfo>>,
    events: mpsc::UnboundedSender<ProcessEvent>,
}

impl ProcessDriver {
    /// Next control request, `None` once every [`ProcessHandle`] was dropped.
    pub async fn next_control(&mut self) -> Option<Control> {
        self.control.recv().await
    }

    /// Sender for [`ProcessEvent`]s, e.g. for an output reader task.
    pub fn events(&self) -> mpsc::UnboundedSender<ProcessEvent> {
        self.events.clone()
    }

    pub fn send_event(&self, event: ProcessEvent) {
        let _ = self.events.send(event);
    }

    /// Publishes the exit status to every handle.
    pub fn report_exit(self, status: ExitInfo) {
        self.exit.send_replace(Some(status));
    }
}

/// Creates the two ends of a process: what the manager holds and what the supervisor drives.
pub fn process_channel(pid: Option<u32>) -> (Spawned, ProcessDriver) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = watch::channel(None);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let spawned = Spawned {
        handle: ProcessHandle { pid, control: control_tx, exit: exit_rx },
        events: events_rx,
    };
    let driver = ProcessDriver { control: control_rx, exit: exit_tx, events: events_tx };
    (spawned, driver)
}

/// Starts sandbox processes.
pub trait Launcher: Send + Sync + 'static {
    /// Spawns `command`. Must be called from within a tokio runtime.
    fn launch(&self, command: &SandboxCommand) -> io::Result<Spawned>;
}

/// Turns port-conflict lines of the sandbox's error stream into [`ProcessEvent::PortInUse`].
#[derive(Debug, Clone)]
pub struct PortConflictDetector {
    marker: String,
    reported: bool,
}

impl PortConflictDetector {
    pub fn new(marker: impl Into<String>) -> Self {
        Self { marker: marker.into(), reported: false }
    }

    /// Returns an event for the first matching line only.
    pub fn inspect(&mut self, line: &str) -> Option<ProcessEvent> {
        if self.reported || self.marker.is_empty() || !line.contains(&self.marker) {
            return None;
        }
        self.reported = true;
        Some(ProcessEvent::PortInUse { detail: line.to_string() })
    }
}

#[derive(Debug, Clone, Copy, derive_more::Display)]
enum OutputStream {
    #[display("stdout")]
    Stdout,
    #[display("stderr")]
    Stderr,
}

/// [`Launcher`] spawning a real child process with piped output.
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher {
    verbose: bool,
}

impl CommandLauncher {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, command: &SandboxCommand) -> io::Result<Spawned> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (spawned, driver) = process_channel(child.id());
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_output(
                stdout,
                OutputStream::Stdout,
                self.verbose,
                None,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            let detector = PortConflictDetector::new(&command.port_conflict_marker);
            let conflict = (detector, driver.events());
            readers.push(tokio::spawn(forward_output(
                stderr,
                OutputStream::Stderr,
                self.verbose,
                Some(conflict),
            )));
        }
        tokio::spawn(supervise(child, driver, readers));

        Ok(spawned)
    }
}

async fn forward_output<R>(
    reader: R,
    stream: OutputStream,
    verbose: bool,
    mut conflict: Option<(PortConflictDetector, mpsc::UnboundedSender<ProcessEvent>)>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(%stream, error = %e, "stopped reading sandbox output");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if verbose {
            info!(%stream, "sandbox: {line}");
        } else {
            trace!(%stream, "sandbox: {line}");
        }
        if let Some((detector, events)) = conflict.as_mut() {
            if let Some(event) = detector.inspect(line) {
                let _ = events.send(event);
            }
        }
    }
}

// Owns the child until it exits. Exit is reported only after the output readers drained, so a
// port conflict printed right before exiting always reaches the manager first.
async fn supervise(mut child: Child, mut driver: ProcessDriver, readers: Vec<JoinHandle<()>>) {
    let mut terminating = false;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            control = driver.next_control() => match control {
                Some(Control::Terminate) => {
                    terminating = true;
                    if let Err(e) = send_terminate(&mut child) {
                        warn!(error = %e, "failed to signal sandbox process");
                    }
                }
                Some(Control::Kill) => {
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill sandbox process");
                    }
                }
                None => {
                    if terminating {
                        let graceful = tokio::time::timeout(ORPHAN_GRACE_PERIOD, child.wait());
                        if let Ok(status) = graceful.await {
                            break status;
                        }
                    }
                    debug!("all sandbox handles dropped, killing the process");
                    let _ = child.start_kill();
                    break child.wait().await;
                }
            },
        }
    };

    for reader in readers {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
    }

    let status = match status {
        Ok(status) => ExitInfo::from(status),
        Err(e) => {
            warn!(error = %e, "failed to wait for sandbox process");
            ExitInfo::default()
        }
    };
    debug!(%status, "sandbox process exited");
    driver.report_exit(status);
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    use nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    };

    // Already reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
