use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct SignalState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation flag shared between a run and whoever may stop it.
///
/// Cancelling is sticky and idempotent. Work already admitted is never interrupted;
/// the run checks the flag before admitting more.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    state: Arc<SignalState>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        let first = !self.state.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.state.notify.notify_waiters();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is cancelled. Returns immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
