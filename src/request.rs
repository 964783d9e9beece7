use std::error::Error as StdError;
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri};
use serde::Serialize;

use crate::Result;
use crate::cancel::CancelToken;
use crate::client::Client;
use crate::error::Error;
use crate::hooks::{AfterResponseHook, BeforeErrorHook, BeforeRequestHook, BeforeRetryHook};
use crate::options::{Options, StatusPolicy, TimeoutSetting};
use crate::progress::{Progress, ProgressFn};
use crate::response::Response;
use crate::retry::RetryPolicy;
use crate::transport::{BodyStream, BoxError};
use crate::util::{parse_header_name, parse_header_value};

/// Request payload. `Buffered` bodies replay across retries by cheap
/// [`Bytes`] clone; `Streaming` bodies are one-shot and disable retry.
pub enum RequestBody {
    Empty,
    Buffered(Bytes),
    Streaming(BodyStream),
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn buffered(body: impl Into<Bytes>) -> Self {
        Self::Buffered(body.into())
    }

    pub fn streaming<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        Self::Streaming(
            stream
                .map(|item| item.map_err(|error| Box::new(error) as BoxError))
                .boxed(),
        )
    }

    pub fn is_replayable(&self) -> bool {
        !matches!(self, Self::Streaming(_))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Buffered(body) => Some(body),
            _ => None,
        }
    }

    /// Body to hand the transport for one attempt. A streaming body moves
    /// out (leaving `Empty` behind); the retry ceiling guarantees no second
    /// attempt can observe the gap.
    pub(crate) fn take_for_attempt(&mut self) -> RequestBody {
        match self {
            Self::Empty => Self::Empty,
            Self::Buffered(body) => Self::Buffered(body.clone()),
            Self::Streaming(_) => std::mem::replace(self, Self::Empty),
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => formatter.write_str("Empty"),
            Self::Buffered(body) => formatter
                .debug_tuple("Buffered")
                .field(&body.len())
                .finish(),
            Self::Streaming(_) => formatter.write_str("Streaming"),
        }
    }
}

/// The request threaded through the hook pipeline and handed to the
/// transport. before-request and before-retry hooks may mutate it in place;
/// the mutated form is what subsequent hooks and attempts observe.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Uri,
    url_text: String,
    headers: HeaderMap,
    body: RequestBody,
}

impl Request {
    pub fn new(method: Method, url: Uri, headers: HeaderMap, body: RequestBody) -> Self {
        let url_text = url.to_string();
        Self {
            method,
            url,
            url_text,
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn url_str(&self) -> &str {
        &self.url_text
    }

    pub fn set_url(&mut self, url: Uri) {
        self.url_text = url.to_string();
        self.url = url;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn set_body(&mut self, body: RequestBody) {
        self.body = body;
    }

    pub fn body_replayable(&self) -> bool {
        self.body.is_replayable()
    }

    /// Snapshot for one transport attempt, leaving this request intact for
    /// hooks and later retries.
    pub(crate) fn take_attempt_request(&mut self) -> Request {
        Request {
            method: self.method.clone(),
            url: self.url.clone(),
            url_text: self.url_text.clone(),
            headers: self.headers.clone(),
            body: self.body.take_for_attempt(),
        }
    }
}

/// Per-call builder returned by [`Client::get`] and friends. Everything set
/// here forms the call layer, resolved over the client's defaults when
/// [`send`](Self::send) runs.
#[must_use = "a call builder does nothing until `send` is awaited"]
pub struct CallBuilder<'a> {
    client: &'a Client,
    method: Method,
    path: String,
    options: Options,
    body: RequestBody,
}

impl<'a> CallBuilder<'a> {
    pub(crate) fn new(client: &'a Client, method: Method, path: String) -> Self {
        Self {
            client,
            method,
            path,
            options: Options::default(),
            body: RequestBody::Empty,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.options.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in &headers {
            self.options.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn prefix_url(mut self, prefix_url: impl Into<String>) -> Self {
        self.options.prefix_url = Some(prefix_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = TimeoutSetting::After(timeout);
        self
    }

    /// Disables the internal timeout for this call, whatever the client
    /// defaults say.
    pub fn no_timeout(mut self) -> Self {
        self.options.timeout = TimeoutSetting::Disabled;
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.options.retry = Some(retry_policy);
        self
    }

    /// Shorthand for a standard policy with the given total attempt count.
    pub fn retry_limit(mut self, max_attempts: usize) -> Self {
        self.options.retry = Some(RetryPolicy::standard().max_attempts(max_attempts));
        self
    }

    pub fn status_policy(mut self, status_policy: StatusPolicy) -> Self {
        self.options.status_policy = Some(status_policy);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Buffered(body.into());
        self
    }

    /// One-shot streamed body; disables retry for this call.
    pub fn body_stream<S, E>(mut self, stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: StdError + Send + Sync + 'static,
    {
        self.body = RequestBody::streaming(stream);
        self
    }

    pub fn json<T>(self, payload: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|source| Error::Serialize { source })?;
        let with_body = self.body(body);
        Ok(with_body.header(CONTENT_TYPE, HeaderValue::from_static("application/json")))
    }

    pub fn cancel_token(mut self, cancel_token: CancelToken) -> Self {
        self.options.cancel_token = Some(cancel_token);
        self
    }

    pub fn on_download_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.options.on_download_progress = Some(std::sync::Arc::new(on_progress) as ProgressFn);
        self
    }

    pub fn before_request(mut self, hook: impl BeforeRequestHook + 'static) -> Self {
        self.options.hooks.before_request.push(std::sync::Arc::new(hook));
        self
    }

    pub fn before_retry(mut self, hook: impl BeforeRetryHook + 'static) -> Self {
        self.options.hooks.before_retry.push(std::sync::Arc::new(hook));
        self
    }

    pub fn after_response(mut self, hook: impl AfterResponseHook + 'static) -> Self {
        self.options.hooks.after_response.push(std::sync::Arc::new(hook));
        self
    }

    pub fn before_error(mut self, hook: impl BeforeErrorHook + 'static) -> Self {
        self.options.hooks.before_error.push(std::sync::Arc::new(hook));
        self
    }

    pub async fn send(self) -> Result<Response> {
        self.client
            .execute(self.method, self.path, self.options, self.body)
            .await
    }
}
