//! One-shot broadcast close signal
//!
//! `SafeCloser` lets any number of tasks wait for a single "closed" event.
//! `close` is idempotent, never blocks, and is safe from any thread; waiters
//! that subscribe after the event still observe it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Default)]
struct CloserInner {
    closed: AtomicBool,
    notify: Notify,
}

/// Cheap-to-clone one-shot close signal
#[derive(Clone, Default)]
pub struct SafeCloser {
    inner: Arc<CloserInner>,
}

impl SafeCloser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the close signal. Only the first call has any effect.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the signal has fired.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn closed(&self) {
        // Register the waiter before checking the flag, otherwise a close
        // landing between the check and the await would be missed.
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}
