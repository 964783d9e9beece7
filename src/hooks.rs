//! Lifecycle hook pipeline. Four kinds, each an ordered list run
//! sequentially in registration order around the transport call:
//! before-request, before-retry, after-response, before-error.
//!
//! Hooks of the first three kinds are fallible; an error they return skips
//! the rest of the pipeline and goes straight into before-error processing,
//! whose (possibly replaced) error is what the caller finally sees.

use std::sync::Arc;

use crate::error::Error;
use crate::options::EffectiveOptions;
use crate::request::Request;
use crate::response::Response;

/// Outcome of a before-request hook.
pub enum BeforeRequestAction {
    Continue,
    /// Short-circuit: skip the remaining before-request hooks and the
    /// transport; the response continues through after-response processing.
    Respond(Response),
}

/// Outcome of a before-retry hook.
pub enum BeforeRetryAction {
    Continue,
    /// Terminate the retry loop now, surfacing the last attempt's error.
    Stop,
}

pub trait BeforeRequestHook: Send + Sync {
    fn run(
        &self,
        request: &mut Request,
        options: &EffectiveOptions,
    ) -> Result<BeforeRequestAction, Error>;
}

impl<F> BeforeRequestHook for F
where
    F: Fn(&mut Request, &EffectiveOptions) -> Result<BeforeRequestAction, Error> + Send + Sync,
{
    fn run(
        &self,
        request: &mut Request,
        options: &EffectiveOptions,
    ) -> Result<BeforeRequestAction, Error> {
        self(request, options)
    }
}

pub trait BeforeRetryHook: Send + Sync {
    /// `next_attempt` is the 1-based index of the attempt about to run.
    fn run(
        &self,
        request: &mut Request,
        options: &EffectiveOptions,
        error: &Error,
        next_attempt: usize,
    ) -> Result<BeforeRetryAction, Error>;
}

impl<F> BeforeRetryHook for F
where
    F: Fn(&mut Request, &EffectiveOptions, &Error, usize) -> Result<BeforeRetryAction, Error>
        + Send
        + Sync,
{
    fn run(
        &self,
        request: &mut Request,
        options: &EffectiveOptions,
        error: &Error,
        next_attempt: usize,
    ) -> Result<BeforeRetryAction, Error> {
        self(request, options, error, next_attempt)
    }
}

pub trait AfterResponseHook: Send + Sync {
    /// May return a replacement response, which feeds the next hook.
    fn run(
        &self,
        request: &Request,
        options: &EffectiveOptions,
        response: Response,
    ) -> Result<Response, Error>;
}

impl<F> AfterResponseHook for F
where
    F: Fn(&Request, &EffectiveOptions, Response) -> Result<Response, Error> + Send + Sync,
{
    fn run(
        &self,
        request: &Request,
        options: &EffectiveOptions,
        response: Response,
    ) -> Result<Response, Error> {
        self(request, options, response)
    }
}

pub trait BeforeErrorHook: Send + Sync {
    /// The returned error replaces the incoming one for the rest of the
    /// pipeline and, ultimately, the caller.
    fn run(&self, error: Error) -> Error;
}

impl<F> BeforeErrorHook for F
where
    F: Fn(Error) -> Error + Send + Sync,
{
    fn run(&self, error: Error) -> Error {
        self(error)
    }
}

/// Ordered hook lists for one configuration layer. Layers concatenate, so
/// defaults run first, then client-level hooks, then call-level ones.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) before_request: Vec<Arc<dyn BeforeRequestHook>>,
    pub(crate) before_retry: Vec<Arc<dyn BeforeRetryHook>>,
    pub(crate) after_response: Vec<Arc<dyn AfterResponseHook>>,
    pub(crate) before_error: Vec<Arc<dyn BeforeErrorHook>>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Hooks")
            .field("before_request", &self.before_request.len())
            .field("before_retry", &self.before_retry.len())
            .field("after_response", &self.after_response.len())
            .field("before_error", &self.before_error.len())
            .finish()
    }
}

impl Hooks {
    pub(crate) fn extend(&mut self, other: &Hooks) {
        self.before_request.extend(other.before_request.iter().cloned());
        self.before_retry.extend(other.before_retry.iter().cloned());
        self.after_response.extend(other.after_response.iter().cloned());
        self.before_error.extend(other.before_error.iter().cloned());
    }

    pub(crate) fn run_before_request(
        &self,
        request: &mut Request,
        options: &EffectiveOptions,
    ) -> Result<Option<Response>, Error> {
        for hook in &self.before_request {
            match hook.run(request, options)? {
                BeforeRequestAction::Continue => {}
                BeforeRequestAction::Respond(response) => return Ok(Some(response)),
            }
        }
        Ok(None)
    }

    pub(crate) fn run_before_retry(
        &self,
        request: &mut Request,
        options: &EffectiveOptions,
        error: &Error,
        next_attempt: usize,
    ) -> Result<BeforeRetryAction, Error> {
        for hook in &self.before_retry {
            match hook.run(request, options, error, next_attempt)? {
                BeforeRetryAction::Continue => {}
                BeforeRetryAction::Stop => return Ok(BeforeRetryAction::Stop),
            }
        }
        Ok(BeforeRetryAction::Continue)
    }

    pub(crate) fn run_after_response(
        &self,
        request: &Request,
        options: &EffectiveOptions,
        mut response: Response,
    ) -> Result<Response, Error> {
        for hook in &self.after_response {
            response = hook.run(request, options, response)?;
        }
        Ok(response)
    }

    pub(crate) fn run_before_error(&self, mut error: Error) -> Error {
        for hook in &self.before_error {
            error = hook.run(error);
        }
        error
    }
}
