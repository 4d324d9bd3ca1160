//! Named registry of cancelable deferred callbacks.
//!
//! Every timer the manager starts lives here under a [`TimerName`], so any exit path can cancel
//! whatever is still pending in one call. A fired timer removes itself before its callback runs.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum TimerName {
    #[display("startup-timeout")]
    StartupTimeout,
    #[display("force-kill-timeout")]
    ForceKill,
    #[display("external-check-timeout")]
    ExternalCheck,
}

struct Entry {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: HashMap<TimerName, Entry>,
}

impl Drop for Registry {
    fn drop(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.handle.abort();
        }
    }
}

/// Clonable handle to a timer registry. Clones share the same timers.
#[derive(Clone, Default)]
pub struct TimerSet {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for TimerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerSet").field("pending", &self.pending()).finish()
    }
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `callback` after `delay` unless cancelled first. Scheduling a name that is already
    /// pending cancels the previous timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, name: TimerName, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;

        let weak = Arc::downgrade(&self.registry);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if claim(&weak, name, id) {
                tracing::trace!(timer = %name, "timer fired");
                callback();
            }
        });

        // Inserted while the lock is held, so the task can never look itself up too early
        if let Some(previous) = registry.entries.insert(name, Entry { id, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancels a pending timer. Returns whether one was pending.
    pub fn cancel(&self, name: TimerName) -> bool {
        match self.registry.lock().entries.remove(&name) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer.
    pub fn cancel_all(&self) {
        let drained: Vec<Entry> = self.registry.lock().entries.drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.handle.abort();
        }
    }

    pub fn is_pending(&self, name: TimerName) -> bool {
        self.registry.lock().entries.contains_key(&name)
    }

    /// Names of the pending timers, sorted.
    pub fn pending(&self) -> Vec<TimerName> {
        let mut names: Vec<TimerName> = self.registry.lock().entries.keys().copied().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().entries.is_empty()
    }
}

// Removes the entry if it still belongs to the timer `id`. A replaced or cancelled timer loses.
fn claim(registry: &Weak<Mutex<Registry>>, name: TimerName, id: u64) -> bool {
    let Some(registry) = registry.upgrade() else {
        return false;
    };
    let mut registry = registry.lock();
    match registry.entries.get(&name) {
        Some(entry) if entry.id == id => {
            registry.entries.remove(&name);
            true
        }
        _ => false,
    }
}
