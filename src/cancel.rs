//! Cancellation shared by every task of a verification run
//!
//! A [`CancelToken`] fires at most once. Every clone observes the same first
//! reason, so a probe deep inside the engine reports exactly the error the
//! top-level caller triggered.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Why a run stopped before its input was exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CancelReason {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cloneable cancellation signal
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<Option<CancelReason>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    /// Fire the token. Later calls keep the first reason.
    pub fn cancel(&self) {
        self.fire(CancelReason::Canceled);
    }

    /// Derive a token that fires with the parent, or on its own once
    /// `timeout` elapses. Must be called within a Tokio runtime.
    pub fn child_with_timeout(&self, timeout: Duration) -> CancelToken {
        let child = CancelToken::new();
        let parent = self.cancelled();
        let released = child.cancelled();
        let watcher = child.clone();

        tokio::spawn(async move {
            tokio::select! {
                reason = parent => watcher.fire(reason),
                _ = tokio::time::sleep(timeout) => watcher.fire(CancelReason::DeadlineExceeded),
                _ = released => false,
            };
        });

        child
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.state.borrow()
    }

    /// Future resolving with the reason once the token fires.
    ///
    /// The future owns its own subscription, so it can be moved into
    /// spawned tasks and stream adapters.
    pub fn cancelled(&self) -> impl Future<Output = CancelReason> + Send + 'static {
        let mut rx = self.state.subscribe();
        async move {
            let fired = rx.wait_for(Option::is_some).await.map(|state| *state);
            match fired {
                Ok(Some(reason)) => reason,
                Ok(None) => CancelReason::Canceled,
                // every token is gone, nobody can fire it anymore
                Err(_) => std::future::pending().await,
            }
        }
    }

    fn fire(&self, reason: CancelReason) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(reason);
            true
        })
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
