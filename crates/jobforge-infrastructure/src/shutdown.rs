//! Shutdown coordination
//!
//! A one-shot broadcast flag plus an ordered list of cleanup callbacks.
//! Callbacks run in reverse registration order (LIFO): whatever acquired
//! its resources last releases them first. Each callback runs at most once
//! and must itself be idempotent.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

type Cleanup = Box<dyn FnOnce() + Send>;

/// One-shot shutdown signal with ordered cleanup
#[derive(Default)]
pub struct ShutdownCoordinator {
    triggered: AtomicBool,
    cleanups: Mutex<Vec<(String, Cleanup)>>,
}

impl ShutdownCoordinator {
    /// Creates an untriggered coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            info!("shutdown signalled");
        }
    }

    /// Returns true once [`trigger`](Self::trigger) has fired.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Registers a named cleanup callback.
    ///
    /// Registration order matters: cleanups run LIFO.
    pub fn register(&self, name: impl Into<String>, cleanup: impl FnOnce() + Send + 'static) {
        self.cleanups.lock().push((name.into(), Box::new(cleanup)));
    }

    /// Runs all registered cleanups in reverse registration order.
    ///
    /// Each callback runs at most once; calling this again is a no-op.
    pub fn run_cleanups(&self) {
        let mut cleanups = self.cleanups.lock();
        while let Some((name, cleanup)) = cleanups.pop() {
            debug!(cleanup = %name, "running shutdown cleanup");
            cleanup();
        }
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("triggered", &self.is_triggered())
            .field("cleanups", &self.cleanups.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_trigger_is_one_shot() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_triggered());
        coordinator.trigger();
        coordinator.trigger();
        assert!(coordinator.is_triggered());
    }

    #[test]
    fn test_cleanups_run_lifo() {
        let coordinator = ShutdownCoordinator::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["store", "backends", "scheduler"] {
            let order = Arc::clone(&order);
            coordinator.register(name, move || order.lock().push(name));
        }
        coordinator.run_cleanups();

        assert_eq!(*order.lock(), vec!["scheduler", "backends", "store"]);
    }

    #[test]
    fn test_cleanups_run_once() {
        let coordinator = ShutdownCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        coordinator.register("count", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.run_cleanups();
        coordinator.run_cleanups();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
