use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::header::{HeaderName, HeaderValue};
use http::Method;
use tokio::time::sleep;
use tracing::{Instrument, debug, info_span, warn};

use crate::Result;
use crate::cancel::{CancelToken, CombinedCancel};
use crate::error::Error;
use crate::hooks::{
    AfterResponseHook, BeforeErrorHook, BeforeRequestHook, BeforeRetryAction, BeforeRetryHook,
    Hooks,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::options::{EffectiveOptions, Options, StatusPolicy, TimeoutSetting, resolve};
use crate::progress::{self, Progress, ProgressFn};
use crate::request::{CallBuilder, Request, RequestBody};
use crate::response::{Response, read_error_body};
use crate::retry::{AttemptReport, RetryMachine, RetryPolicy, RetryStep};
use crate::transport::{Transport, TransportError};
use crate::util::{
    parse_header_name, parse_header_value, parse_retry_after, redact_url_for_logs, truncate_body,
    validate_prefix_url,
};

const DEFAULT_CLIENT_NAME: &str = "fetchx";
const ERROR_BODY_READ_LIMIT: usize = 4096;

/// The request execution engine. Cheap to clone; all clones share the same
/// transport, defaults, and metrics.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    defaults: Options,
    client_name: String,
    metrics: Metrics,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("client_name", &self.inner.client_name)
            .field("defaults", &self.inner.defaults)
            .finish()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> CallBuilder<'_> {
        CallBuilder::new(self, method, path.into())
    }

    pub fn get(&self, path: impl Into<String>) -> CallBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> CallBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> CallBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> CallBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    pub fn head(&self, path: impl Into<String>) -> CallBuilder<'_> {
        self.request(Method::HEAD, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> CallBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    pub(crate) async fn execute(
        &self,
        method: Method,
        path: String,
        call: Options,
        body: RequestBody,
    ) -> Result<Response> {
        let inner = &self.inner;
        let (options, hooks) = resolve(&inner.defaults, &call, method, &path)?;

        inner.metrics.record_request_started();
        let _in_flight = inner.metrics.enter_in_flight();

        // One combine per call: the deadline spans every attempt. The timer
        // itself only exists while a `fired()` future is alive, so each exit
        // path below releases it by drop.
        let combined = CombinedCancel::combine(options.cancel_token.clone(), options.timeout);

        match self.run_attempts(&options, &hooks, &combined, body).await {
            Ok(response) => {
                inner.metrics.record_success(response.status().as_u16());
                Ok(apply_progress(response, &options, &combined))
            }
            Err(error) => {
                let error = hooks.run_before_error(error);
                inner.metrics.record_failure(&error);
                Err(error)
            }
        }
    }

    async fn run_attempts(
        &self,
        options: &EffectiveOptions,
        hooks: &Hooks,
        combined: &CombinedCancel,
        body: RequestBody,
    ) -> Result<Response> {
        let inner = &self.inner;
        let mut request = Request::new(
            options.method.clone(),
            options.url.clone(),
            options.headers.clone(),
            body,
        );
        let mut machine = RetryMachine::new(
            options.retry.clone(),
            request.method(),
            request.body_replayable(),
        );
        let redacted_url = redact_url_for_logs(&options.url_text);

        loop {
            // The span is attached as an explicit parent so the call future
            // stays `Send`.
            let span = info_span!(
                "fetchx.request",
                client = %inner.client_name,
                method = %request.method(),
                url = %redacted_url,
                attempt = machine.attempt(),
                max_attempts = machine.max_attempts()
            );

            if let Some(cause) = combined.check() {
                return Err(cause.into_error(request.method(), request.url_str()));
            }

            debug!(parent: &span, "sending request");
            let outcome = match hooks.run_before_request(&mut request, options)? {
                Some(short_circuit) => {
                    debug!(parent: &span, "before-request hook answered without the transport");
                    Ok(short_circuit)
                }
                None => {
                    let attempt_request = request.take_attempt_request();
                    let send = inner.transport.send(attempt_request).instrument(span.clone());
                    tokio::select! {
                        biased;
                        cause = combined.fired() => {
                            return Err(cause.into_error(request.method(), request.url_str()));
                        }
                        result = send => result
                            .map(|reply| {
                                Response::new(
                                    reply.status,
                                    reply.headers,
                                    request.url_str().to_owned(),
                                    reply.body,
                                )
                            })
                            .map_err(|TransportError { kind, source }| Error::Transport {
                                kind,
                                method: request.method().clone(),
                                uri: request.url_str().to_owned(),
                                source,
                            }),
                    }
                }
            };

            let (error, delay) = match outcome {
                Ok(response) => {
                    let response = hooks.run_after_response(&request, options, response)?;
                    let status = response.status();
                    let retry_after = parse_retry_after(response.headers(), SystemTime::now());
                    match machine.report(&AttemptReport::Status {
                        status,
                        retry_after,
                    }) {
                        RetryStep::Succeed => {
                            return if status.is_success()
                                || options.status_policy == StatusPolicy::Allow
                            {
                                Ok(response)
                            } else {
                                Err(http_status_error(response, &request).await)
                            };
                        }
                        RetryStep::Fail => {
                            return if options.status_policy == StatusPolicy::Allow {
                                Ok(response)
                            } else {
                                Err(http_status_error(response, &request).await)
                            };
                        }
                        RetryStep::Retry { delay } => {
                            warn!(
                                parent: &span,
                                status = status.as_u16(),
                                "retrying after retryable status"
                            );
                            (http_status_error(response, &request).await, delay)
                        }
                    }
                }
                Err(error) => match machine.report(&AttemptReport::TransportError) {
                    RetryStep::Retry { delay } => {
                        warn!(parent: &span, error = %error, "retrying after transport failure");
                        (error, delay)
                    }
                    _ => return Err(error),
                },
            };

            match hooks.run_before_retry(&mut request, options, &error, machine.attempt() + 1)? {
                BeforeRetryAction::Stop => {
                    debug!(parent: &span, "before-retry hook stopped the retry loop");
                    return Err(error);
                }
                BeforeRetryAction::Continue => {}
            }

            inner.metrics.record_retry();
            if !delay.is_zero() {
                // Interruptible only by the combined signal.
                tokio::select! {
                    biased;
                    cause = combined.fired() => {
                        return Err(cause.into_error(request.method(), request.url_str()));
                    }
                    _ = sleep(delay) => {}
                }
            }
            machine.advance();
        }
    }
}

fn apply_progress(
    response: Response,
    options: &EffectiveOptions,
    combined: &CombinedCancel,
) -> Response {
    let Some(on_progress) = options.on_download_progress.clone() else {
        return response;
    };

    let total = response.content_length();
    if !response.has_body() {
        on_progress(Progress::completed_empty(total.unwrap_or(0)));
        return response;
    }

    let method = options.method.clone();
    let url_text = response.url().to_owned();
    response.map_body(|body| {
        progress::wrap(body, total, on_progress, combined.clone(), method, url_text)
    })
}

async fn http_status_error(response: Response, request: &Request) -> Error {
    let status = response.status();
    let headers = response.headers().clone();
    let uri = response.url().to_owned();
    let body = read_error_body(response.into_body(), ERROR_BODY_READ_LIMIT).await;
    Error::HttpStatus {
        status: status.as_u16(),
        method: request.method().clone(),
        uri,
        headers: Box::new(headers),
        body: truncate_body(&body),
    }
}

/// Configures and validates a [`Client`].
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    defaults: Options,
    client_name: String,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            defaults: Options::default(),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
        }
    }

    /// The transport capability the engine drives. Required.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Prefix joined ahead of relative request paths.
    pub fn prefix_url(mut self, prefix_url: impl Into<String>) -> Self {
        self.defaults.prefix_url = Some(prefix_url.into());
        self
    }

    /// Name carried in tracing spans.
    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.defaults.headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout = TimeoutSetting::After(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.defaults.timeout = TimeoutSetting::Disabled;
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.defaults.retry = Some(retry_policy);
        self
    }

    pub fn status_policy(mut self, status_policy: StatusPolicy) -> Self {
        self.defaults.status_policy = Some(status_policy);
        self
    }

    pub fn cancel_token(mut self, cancel_token: CancelToken) -> Self {
        self.defaults.cancel_token = Some(cancel_token);
        self
    }

    pub fn on_download_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.defaults.on_download_progress = Some(Arc::new(on_progress) as ProgressFn);
        self
    }

    pub fn before_request(mut self, hook: impl BeforeRequestHook + 'static) -> Self {
        self.defaults.hooks.before_request.push(Arc::new(hook));
        self
    }

    pub fn before_retry(mut self, hook: impl BeforeRetryHook + 'static) -> Self {
        self.defaults.hooks.before_retry.push(Arc::new(hook));
        self
    }

    pub fn after_response(mut self, hook: impl AfterResponseHook + 'static) -> Self {
        self.defaults.hooks.after_response.push(Arc::new(hook));
        self
    }

    pub fn before_error(mut self, hook: impl BeforeErrorHook + 'static) -> Self {
        self.defaults.hooks.before_error.push(Arc::new(hook));
        self
    }

    pub fn try_build(self) -> Result<Client> {
        let Some(transport) = self.transport else {
            return Err(Error::Configuration {
                message: "a transport capability is required to build a client".to_owned(),
            });
        };
        if let Some(prefix_url) = self.defaults.prefix_url.as_deref() {
            validate_prefix_url(prefix_url)?;
        }

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                defaults: self.defaults,
                client_name: self.client_name,
                metrics: Metrics::default(),
            }),
        })
    }
}
