use bytes::Bytes;
use futures_util::StreamExt;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;
use crate::transport::{BodyStream, BoxError};
use crate::util::{parse_content_length, truncate_body};

/// Streamed response. Headers are complete when this exists; the body, when
/// present, is pulled on demand and never buffered by the engine.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: String,
    body: Option<BodyStream>,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, url: String, body: Option<BodyStream>) -> Self {
        Self {
            status,
            headers,
            url,
            body,
        }
    }

    /// Single-chunk response; convenient for tests and for before-request
    /// hooks that answer without a transport round-trip.
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, url: String, body: Bytes) -> Self {
        let stream = futures_util::stream::iter([Ok(body)]).boxed();
        Self::new(status, headers, url, Some(stream))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn content_length(&self) -> Option<u64> {
        parse_content_length(&self.headers)
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn into_body(self) -> Option<BodyStream> {
        self.body
    }

    pub(crate) fn map_body(self, map: impl FnOnce(BodyStream) -> BodyStream) -> Self {
        let Self {
            status,
            headers,
            url,
            body,
        } = self;
        Self {
            status,
            headers,
            url,
            body: body.map(map),
        }
    }

    /// Drains the body to completion. Cancellation and timeout raised by the
    /// engine's body instrumentation keep their classification; anything
    /// else surfaces as a read error.
    pub async fn bytes(self) -> Result<Bytes> {
        let Some(mut body) = self.body else {
            return Ok(Bytes::new());
        };

        let mut collected = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(map_body_error)?;
            collected.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(collected))
    }

    pub async fn text(self) -> Result<String> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn json<T>(self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let body = self.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&body),
        })
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("url", &self.url)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

fn map_body_error(error: BoxError) -> Error {
    match error.downcast::<Error>() {
        Ok(engine_error) => *engine_error,
        Err(source) => Error::ReadBody { source },
    }
}

/// Drains at most `max_bytes` for an error-body excerpt; read failures keep
/// whatever arrived before them.
pub(crate) async fn read_error_body(body: Option<BodyStream>, max_bytes: usize) -> Bytes {
    let Some(mut body) = body else {
        return Bytes::new();
    };

    let mut collected = Vec::new();
    while let Some(chunk) = body.next().await {
        let Ok(chunk) = chunk else {
            break;
        };
        let remaining = max_bytes.saturating_sub(collected.len());
        if remaining == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
    }
    Bytes::from(collected)
}
