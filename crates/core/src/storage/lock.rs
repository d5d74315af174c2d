use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guards against two analysis runs overlapping inside one process.
///
/// Acquisition never waits: a second caller is turned away while a run is in
/// flight. The guard releases on drop, including when the run future is
/// cancelled.
#[derive(Debug, Clone, Default)]
pub struct RunLock {
    inner: Arc<Mutex<()>>,
}

#[derive(Debug)]
pub struct RunGuard {
    _guard: OwnedMutexGuard<()>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| RunGuard { _guard: guard })
    }

    pub fn is_running(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
