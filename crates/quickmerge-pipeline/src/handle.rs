use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Running,
    Suspended,
    Finished,
}

pub(crate) struct Shared {
    phase: Mutex<Phase>,
    wake: Notify,
    pub(crate) cancel: CancellationToken,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Idle),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.lock()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        *self.lock() = phase;
    }

    /// Wait until resumed or cancelled. Returns false on cancellation.
    pub(crate) async fn wait_resumed(&self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if self.phase() != Phase::Suspended {
                return true;
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = self.cancel.cancelled() => return false,
            }
        }
    }
}

/// Out-of-band control of a running pipeline. Cheap to clone, `Send + Sync`.
#[derive(Clone)]
pub struct PipelineHandle {
    pub(crate) shared: Arc<Shared>,
}

impl PipelineHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Resume a suspended pipeline. Returns false (and does nothing) when the
    /// pipeline is not suspended.
    pub fn ping(&self) -> bool {
        let mut phase = self.shared.lock();
        if *phase != Phase::Suspended {
            tracing::warn!(phase = ?*phase, "ping ignored: pipeline is not suspended");
            return false;
        }
        *phase = Phase::Running;
        drop(phase);
        self.shared.wake.notify_one();
        true
    }

    /// Discard everything still queued. Work already dispatched finishes, its
    /// follow-ups are dropped.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.phase() == Phase::Suspended
    }

    pub fn is_finished(&self) -> bool {
        self.shared.phase() == Phase::Finished
    }

    pub(crate) fn suspend(&self) {
        self.shared.set_phase(Phase::Suspended);
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("phase", &self.shared.phase())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_outside_suspension_is_noop() {
        let handle = PipelineHandle::new(Arc::new(Shared::new()));
        assert!(!handle.ping());
        handle.shared.set_phase(Phase::Running);
        assert!(!handle.ping());
        assert_eq!(handle.shared.phase(), Phase::Running);
    }

    #[test]
    fn ping_resumes_suspended() {
        let handle = PipelineHandle::new(Arc::new(Shared::new()));
        handle.suspend();
        assert!(handle.is_suspended());
        assert!(handle.ping());
        assert!(!handle.is_suspended());
        // second ping is a no-op
        assert!(!handle.ping());
    }

    #[tokio::test]
    async fn early_ping_is_not_lost() {
        let handle = PipelineHandle::new(Arc::new(Shared::new()));
        handle.suspend();
        handle.ping();
        assert!(handle.shared.wait_resumed().await);
    }

    #[tokio::test]
    async fn cancel_wakes_waiter() {
        let handle = PipelineHandle::new(Arc::new(Shared::new()));
        handle.suspend();
        handle.cancel();
        assert!(!handle.shared.wait_resumed().await);
    }
}
