//! The transport capability the engine orchestrates.
//!
//! A [`Transport`] sends one request and resolves once response headers are
//! available; the body, when present, arrives afterwards as a pull-based byte
//! stream. Transport-level failures (connection refused, DNS, resets) are
//! reported through [`TransportError`] and are distinct from HTTP error
//! statuses, which travel inside a successful [`TransportReply`].

use std::future::Future;

use bytes::Bytes;
use futures_core::future::BoxFuture;
use futures_core::stream::BoxStream;
use http::{HeaderMap, StatusCode};
use thiserror::Error;

use crate::error::TransportErrorKind;
use crate::request::Request;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pull-based response body: binary chunks, terminating with end-of-stream.
pub type BodyStream = BoxStream<'static, Result<Bytes, BoxError>>;

#[derive(Debug, Error)]
#[error("{kind}: {source}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    #[source]
    pub source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn other(source: impl Into<BoxError>) -> Self {
        Self::new(TransportErrorKind::Other, source)
    }
}

/// Headers-first response handed back by a transport.
pub struct TransportReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<BodyStream>,
}

impl TransportReply {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Option<BodyStream>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }
}

impl std::fmt::Debug for TransportReply {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportReply")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> BoxFuture<'_, Result<TransportReply, TransportError>>;
}

/// Adapts an async closure into a [`Transport`].
///
/// Handy for tests and for thin shims over an existing HTTP stack:
///
/// ```
/// use fetchx::{transport_fn, TransportReply};
/// use http::{HeaderMap, StatusCode};
///
/// let transport = transport_fn(|_request| async {
///     Ok(TransportReply::new(StatusCode::NO_CONTENT, HeaderMap::new(), None))
/// });
/// # let _ = transport;
/// ```
pub fn transport_fn<F, Fut>(send: F) -> TransportFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TransportReply, TransportError>> + Send + 'static,
{
    TransportFn { send }
}

pub struct TransportFn<F> {
    send: F,
}

impl<F, Fut> Transport for TransportFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TransportReply, TransportError>> + Send + 'static,
{
    fn send(&self, request: Request) -> BoxFuture<'_, Result<TransportReply, TransportError>> {
        Box::pin((self.send)(request))
    }
}
