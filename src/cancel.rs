//! Unified cancellation: a caller-supplied [`CancelToken`] merged with the
//! deadline derived from the resolved timeout. The merged signal is terminal
//! (never un-cancels) and records which source fired first.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::Method;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::util::lock_unpoisoned;

/// Caller-facing cancellation handle. Clones share state; cancelling any
/// clone cancels them all. The first cancellation wins and its reason is the
/// one observed end-to-end.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    token: CancellationToken,
    reason: Mutex<Option<String>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel_inner(None);
    }

    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        self.cancel_inner(Some(reason.into()));
    }

    fn cancel_inner(&self, reason: Option<String>) {
        // The reason is published under the lock before the token fires, so
        // any waiter woken by `cancelled()` observes it.
        let mut slot = lock_unpoisoned(&self.inner.reason);
        if self.inner.token.is_cancelled() {
            return;
        }
        *slot = reason;
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        lock_unpoisoned(&self.inner.reason).clone()
    }

    pub(crate) async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }
}

/// Which source fired the combined signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CancelCause {
    TimedOut,
    Aborted { reason: Option<String> },
}

impl CancelCause {
    pub(crate) fn into_error(self, method: &Method, uri: &str) -> Error {
        match self {
            Self::TimedOut => Error::Timeout {
                method: method.clone(),
                uri: uri.to_owned(),
            },
            Self::Aborted { reason } => Error::Aborted {
                reason,
                method: method.clone(),
                uri: uri.to_owned(),
            },
        }
    }
}

/// Read-only merge of the external token and the internal deadline.
///
/// The deadline is fixed at [`combine`](Self::combine) time and spans the
/// whole call, retries included. No timer is armed until a
/// [`fired`](Self::fired) future is polled, and dropping that future
/// releases it, so every exit path disposes the timer without bookkeeping.
#[derive(Clone, Debug)]
pub(crate) struct CombinedCancel {
    external: Option<CancelToken>,
    deadline: Option<tokio::time::Instant>,
}

impl CombinedCancel {
    pub(crate) fn combine(external: Option<CancelToken>, timeout: Option<Duration>) -> Self {
        Self {
            external,
            deadline: timeout.map(|timeout| tokio::time::Instant::now() + timeout),
        }
    }

    /// Non-blocking probe, used at loop entry and by the progress stream.
    pub(crate) fn check(&self) -> Option<CancelCause> {
        if let Some(token) = &self.external
            && token.is_cancelled()
        {
            return Some(CancelCause::Aborted {
                reason: token.reason(),
            });
        }
        if let Some(deadline) = self.deadline
            && tokio::time::Instant::now() >= deadline
        {
            return Some(CancelCause::TimedOut);
        }
        None
    }

    /// Resolves with the first cause. The caller's reason wins ties.
    pub(crate) async fn fired(&self) -> CancelCause {
        let external = async {
            match &self.external {
                Some(token) => {
                    token.cancelled().await;
                    CancelCause::Aborted {
                        reason: token.reason(),
                    }
                }
                None => std::future::pending().await,
            }
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    CancelCause::TimedOut
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            cause = external => cause,
            cause = deadline => cause,
        }
    }
}
