//! Layered call configuration and the pure resolver that folds the three
//! layers (library defaults, client, call) into one effective record.

use std::time::Duration;

use http::{HeaderMap, Method, Uri};

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::hooks::Hooks;
use crate::progress::ProgressFn;
use crate::retry::RetryPolicy;
use crate::util::{merge_headers, resolve_url, validate_prefix_url};

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// What to do with a terminal non-success status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Fail the call with [`Error::HttpStatus`].
    #[default]
    Error,
    /// Hand the response back to the caller as-is.
    Allow,
}

/// Per-layer timeout field. `Disabled` at a later layer suppresses a
/// duration set by an earlier one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutSetting {
    #[default]
    Inherit,
    Disabled,
    After(Duration),
}

impl TimeoutSetting {
    fn or(self, fallback: TimeoutSetting) -> TimeoutSetting {
        match self {
            Self::Inherit => fallback,
            other => other,
        }
    }

    fn resolve(self) -> Option<Duration> {
        match self {
            Self::Inherit => Some(DEFAULT_TIMEOUT),
            Self::Disabled => None,
            Self::After(duration) => Some(duration.max(Duration::from_millis(1))),
        }
    }
}

/// One configuration layer. The client holds one as its instance defaults;
/// every call carries another on top.
#[derive(Clone, Default)]
pub struct Options {
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: TimeoutSetting,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) prefix_url: Option<String>,
    pub(crate) status_policy: Option<StatusPolicy>,
    pub(crate) hooks: Hooks,
    pub(crate) on_download_progress: Option<ProgressFn>,
    pub(crate) cancel_token: Option<CancelToken>,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Options")
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("prefix_url", &self.prefix_url)
            .field("status_policy", &self.status_policy)
            .field("hooks", &self.hooks)
            .field(
                "on_download_progress",
                &self.on_download_progress.as_ref().map(|_| "<callback>"),
            )
            .field("cancel_token", &self.cancel_token)
            .finish()
    }
}

/// The configuration a single call actually runs with. Constructed once by
/// [`resolve`], immutable afterwards; hooks mutate the in-flight
/// [`Request`](crate::Request) instead.
#[derive(Clone)]
pub struct EffectiveOptions {
    pub method: Method,
    pub url: Uri,
    pub url_text: String,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub status_policy: StatusPolicy,
    pub on_download_progress: Option<ProgressFn>,
    pub cancel_token: Option<CancelToken>,
}

impl std::fmt::Debug for EffectiveOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("EffectiveOptions")
            .field("method", &self.method)
            .field("url_text", &self.url_text)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("status_policy", &self.status_policy)
            .field(
                "on_download_progress",
                &self.on_download_progress.as_ref().map(|_| "<callback>"),
            )
            .field("cancel_token", &self.cancel_token)
            .finish()
    }
}

/// Folds the layers field by field: call over instance over library
/// defaults. Header maps merge key-wise; hook lists concatenate
/// defaults -> instance -> call so all registered hooks run.
pub(crate) fn resolve(
    instance: &Options,
    call: &Options,
    method: Method,
    path: &str,
) -> Result<(EffectiveOptions, Hooks), Error> {
    let prefix = call
        .prefix_url
        .as_deref()
        .or(instance.prefix_url.as_deref());
    if let Some(call_prefix) = call.prefix_url.as_deref() {
        validate_prefix_url(call_prefix)?;
    }
    let (url_text, url) = resolve_url(prefix, path)?;

    let headers = merge_headers(&instance.headers, &call.headers);
    let timeout = call.timeout.or(instance.timeout).resolve();
    let retry = call
        .retry
        .clone()
        .or_else(|| instance.retry.clone())
        .unwrap_or_default();
    let status_policy = call
        .status_policy
        .or(instance.status_policy)
        .unwrap_or_default();

    let mut hooks = Hooks::default();
    hooks.extend(&instance.hooks);
    hooks.extend(&call.hooks);

    let on_download_progress = call
        .on_download_progress
        .clone()
        .or_else(|| instance.on_download_progress.clone());
    let cancel_token = call
        .cancel_token
        .clone()
        .or_else(|| instance.cancel_token.clone());

    Ok((
        EffectiveOptions {
            method,
            url,
            url_text,
            headers,
            timeout,
            retry,
            status_policy,
            on_download_progress,
            cancel_token,
        },
        hooks,
    ))
}
