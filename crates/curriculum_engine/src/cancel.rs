//! Cooperative cancellation for commits.
//!
//! A [`CancelToken`] is armed for each commit and threaded into every
//! remote call the executor issues. Cancelling it makes pending calls
//! resolve to [`OperationError::Cancelled`]; their request futures are
//! dropped, so the transport stops awaiting them.

use crate::error::OperationError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cloneable, thread-safe cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Creates an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that is already cancelled.
    pub fn cancelled_token() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    /// Cancels the token and wakes every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves when the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Runs a future unless the token is cancelled first.
    pub async fn guard<F, T>(&self, future: F) -> Result<T, OperationError>
    where
        F: Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(OperationError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(OperationError::Cancelled),
            output = future => Ok(output),
        }
    }

    /// Returns true if both handles observe the same signal.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
