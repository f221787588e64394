//! Completion tracking for dispatched tasks
//!
//! Every task is counted when it is planned and marked done only once its
//! result has been committed by the result sink. A retry adds one more count
//! for its second document.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    pending: AtomicUsize,
    idle: Notify,
}

/// Shared count of results not yet durably written
#[derive(Clone, Default)]
pub struct CompletionTracker {
    inner: Arc<Inner>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        self.inner.pending.fetch_add(n, Ordering::SeqCst);
    }

    /// Marks `n` results as committed; the count never drops below zero
    pub fn done(&self, n: usize) {
        let previous = self
            .inner
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| {
                Some(p.saturating_sub(n))
            })
            .unwrap_or(0);
        if previous.saturating_sub(n) == 0 {
            self.inner.idle.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Resolves once every counted result has been committed
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}
