//! Process-wide shutdown coordination.
//!
//! A [`SignalCoordinator`] holds a weak reference to the single active sandbox manager. When
//! SIGINT or SIGTERM arrives the installed listener stops that manager, then exits the process.
//! Tests build their own coordinator instead of touching [`SignalCoordinator::global`].

use std::{
    future::Future,
    io,
    pin::Pin,
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::{error, info};

/// Something that can be shut down when the process is asked to terminate.
pub trait ShutdownTarget: Send + Sync {
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ShutdownSignal {
    #[display("SIGINT")]
    Interrupt,
    #[display("SIGTERM")]
    Terminate,
}

#[derive(Default)]
struct Inner {
    active: Mutex<Option<Weak<dyn ShutdownTarget>>>,
    installed: AtomicBool,
}

#[derive(Clone, Default)]
pub struct SignalCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SignalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalCoordinator")
            .field("has_active", &self.has_active())
            .field("installed", &self.is_installed())
            .finish()
    }
}

static GLOBAL: OnceLock<SignalCoordinator> = OnceLock::new();

impl SignalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The coordinator shared by the whole process.
    pub fn global() -> &'static SignalCoordinator {
        GLOBAL.get_or_init(SignalCoordinator::default)
    }

    /// Makes `target` the active instance, replacing any previous one.
    pub fn register(&self, target: Weak<dyn ShutdownTarget>) {
        *self.inner.active.lock() = Some(target);
    }

    /// Clears the active instance if it is still `target`.
    pub fn clear(&self, target: &Weak<dyn ShutdownTarget>) {
        let mut active = self.inner.active.lock();
        if active.as_ref().is_some_and(|current| Weak::ptr_eq(current, target)) {
            *active = None;
        }
    }

    /// Whether a live instance is registered.
    pub fn has_active(&self) -> bool {
        self.inner.active.lock().as_ref().is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Whether `target` is the registered instance.
    pub fn is_active(&self, target: &Weak<dyn ShutdownTarget>) -> bool {
        self.inner.active.lock().as_ref().is_some_and(|current| Weak::ptr_eq(current, target))
    }

    pub fn is_installed(&self) -> bool {
        self.inner.installed.load(Ordering::SeqCst)
    }

    /// Stops the active instance, if any. Returns whether one was stopped.
    pub async fn trigger(&self, signal: ShutdownSignal) -> bool {
        let target = self.inner.active.lock().take().and_then(|weak| weak.upgrade());
        let Some(target) = target else {
            info!(%signal, "no active sandbox manager to stop");
            return false;
        };
        info!(%signal, "stopping active sandbox manager");
        target.shutdown().await;
        info!("sandbox manager stopped");
        true
    }

    /// Installs the SIGINT/SIGTERM listener. Only the first call per coordinator installs
    /// anything; later calls return `Ok(false)`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install(&self) -> io::Result<bool> {
        if self.inner.installed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let listener = match SignalListener::new() {
            Ok(listener) => listener,
            Err(e) => {
                self.inner.installed.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let coordinator = self.clone();
        tokio::spawn(async move {
            match listener.recv().await {
                Ok(signal) => {
                    coordinator.trigger(signal).await;
                    std::process::exit(0);
                }
                Err(e) => error!(error = %e, "failed to listen for shutdown signals"),
            }
        });
        Ok(true)
    }
}

#[cfg(unix)]
struct SignalListener {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) -> io::Result<ShutdownSignal> {
        tokio::select! {
            _ = self.interrupt.recv() => Ok(ShutdownSignal::Interrupt),
            _ = self.terminate.recv() => Ok(ShutdownSignal::Terminate),
        }
    }
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> io::Result<ShutdownSignal> {
        tokio::signal::ctrl_c().await?;
        Ok(ShutdownSignal::Interrupt)
    }
}
