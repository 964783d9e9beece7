//! Download-progress instrumentation. The response body is wrapped in a
//! pass-through stream adapter: every chunk is forwarded byte-for-byte and a
//! [`Progress`] record is reported per chunk. The body is never buffered.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::future::BoxFuture;
use futures_core::stream::Stream;
use http::Method;

use crate::cancel::{CancelCause, CombinedCancel};
use crate::transport::{BodyStream, BoxError};

/// One progress record.
///
/// `percent` is `transferred / total` when the total is known and non-zero,
/// `1.0` when the total is known to be zero, and `0.0` while it is unknown.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    pub percent: f64,
    pub transferred: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub(crate) fn step(transferred: u64, total: Option<u64>) -> Self {
        let percent = match total {
            Some(0) => 1.0,
            Some(total) => transferred as f64 / total as f64,
            None => 0.0,
        };
        Self {
            percent,
            transferred,
            total,
        }
    }

    /// The single record reported for a response with no body at all.
    pub(crate) fn completed_empty(total: u64) -> Self {
        Self {
            percent: 1.0,
            transferred: 0,
            total: Some(total),
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Wraps a body stream; reports the `transferred = 0` record synchronously
/// before the first chunk can be pulled.
pub(crate) fn wrap(
    body: BodyStream,
    total: Option<u64>,
    on_progress: ProgressFn,
    cancel: CombinedCancel,
    method: Method,
    url_text: String,
) -> BodyStream {
    on_progress(Progress::step(0, total));

    let cancelled: BoxFuture<'static, CancelCause> =
        Box::pin(async move { cancel.fired().await });

    Box::pin(ProgressStream {
        inner: body,
        cancelled,
        on_progress,
        method,
        url_text,
        transferred: 0,
        total,
        done: false,
    })
}

struct ProgressStream {
    inner: BodyStream,
    cancelled: BoxFuture<'static, CancelCause>,
    on_progress: ProgressFn,
    method: Method,
    url_text: String,
    transferred: u64,
    total: Option<u64>,
    done: bool,
}

impl Stream for ProgressStream {
    type Item = Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        // Cancellation mid-transfer propagates without a further record.
        if let Poll::Ready(cause) = this.cancelled.as_mut().poll(cx) {
            this.done = true;
            let error = cause.into_error(&this.method, &this.url_text);
            return Poll::Ready(Some(Err(Box::new(error) as BoxError)));
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.transferred = this.transferred.saturating_add(chunk.len() as u64);
                (this.on_progress)(Progress::step(this.transferred, this.total));
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
