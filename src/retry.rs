use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use rand::Rng;

/// Whether the elapsed-time budget counts from the very first attempt or is
/// re-armed at the start of each attempt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ElapsedBasis {
    #[default]
    FirstAttempt,
    LastAttempt,
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter_ratio: f64,
    retryable_methods: Vec<Method>,
    retryable_status_codes: BTreeSet<u16>,
    retry_after_status_codes: BTreeSet<u16>,
    max_retry_after: Option<Duration>,
    max_elapsed: Option<Duration>,
    elapsed_basis: ElapsedBasis,
}

impl RetryPolicy {
    /// One attempt, no retries.
    pub fn disabled() -> Self {
        Self::standard().max_attempts(1)
    }

    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter_ratio: 0.2,
            retryable_methods: default_retryable_methods(),
            retryable_status_codes: default_retryable_status_codes(),
            retry_after_status_codes: default_retry_after_status_codes(),
            max_retry_after: None,
            max_elapsed: None,
            elapsed_basis: ElapsedBasis::FirstAttempt,
        }
    }

    /// Total attempt count. A limit of 0 behaves like 1: the initial attempt
    /// still runs, no retry ever does.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff.max(Duration::from_millis(1));
        if self.max_backoff < self.base_backoff {
            self.max_backoff = self.base_backoff;
        }
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.base_backoff);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn retryable_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.retryable_methods = methods.into_iter().collect();
        self
    }

    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Statuses whose `Retry-After` header overrides the computed backoff.
    pub fn retry_after_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_after_status_codes = codes.into_iter().collect();
        self
    }

    /// Upper bound applied to a server-provided `Retry-After` delay.
    pub fn max_retry_after(mut self, max_retry_after: Duration) -> Self {
        self.max_retry_after = Some(max_retry_after);
        self
    }

    /// Elapsed-time budget; once a retry would overrun it, the call fails
    /// with the last attempt's error.
    pub fn max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    pub fn elapsed_basis(mut self, elapsed_basis: ElapsedBasis) -> Self {
        self.elapsed_basis = elapsed_basis;
        self
    }

    pub(crate) fn max_attempts_value(&self) -> usize {
        self.max_attempts
    }

    pub(crate) fn method_supports_retry(&self, method: &Method) -> bool {
        self.retryable_methods.contains(method)
    }

    pub(crate) fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_status_codes.contains(&status.as_u16())
    }

    fn honors_retry_after(&self, status: StatusCode) -> bool {
        self.retry_after_status_codes.contains(&status.as_u16())
    }

    pub(crate) fn backoff_for_retry(&self, retry_index: usize) -> Duration {
        let capped_exponent = retry_index.saturating_sub(1).min(31) as u32;
        let multiplier = 1_u128 << capped_exponent;
        let base_ms = self.base_backoff.as_millis().max(1);
        let max_ms = self.max_backoff.as_millis().max(base_ms);
        let delay_ms = base_ms
            .saturating_mul(multiplier)
            .min(max_ms)
            .min(u64::MAX as u128) as u64;
        self.apply_jitter(Duration::from_millis(delay_ms))
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }
        let max_backoff_ms = self.max_backoff.as_millis().min(u64::MAX as u128) as u64;

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let sampled_ms = rng.random_range(low..=high).min(max_backoff_ms.max(1));
        Duration::from_millis(sampled_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

fn default_retryable_methods() -> Vec<Method> {
    vec![
        Method::GET,
        Method::HEAD,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
        Method::TRACE,
    ]
}

fn default_retryable_status_codes() -> BTreeSet<u16> {
    [408_u16, 413, 429, 500, 502, 503, 504]
        .into_iter()
        .collect()
}

fn default_retry_after_status_codes() -> BTreeSet<u16> {
    [413_u16, 429, 503].into_iter().collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    Retrying,
    Succeeded,
    Failed,
}

/// What the orchestrator observed for the attempt that just finished.
#[derive(Clone, Debug)]
pub(crate) enum AttemptReport {
    Status {
        status: StatusCode,
        retry_after: Option<Duration>,
    },
    TransportError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RetryStep {
    Succeed,
    Retry { delay: Duration },
    Fail,
}

/// The bounded attempt loop as an explicit state machine.
///
/// `Attempting -> (Succeeded | Retrying | Failed)`, `Retrying -> Attempting`
/// via [`advance`](Self::advance). The effective attempt ceiling is fixed up
/// front: a non-retryable method or a one-shot streamed body forces a single
/// attempt no matter what the policy says.
pub(crate) struct RetryMachine {
    policy: RetryPolicy,
    attempt: usize,
    max_attempts: usize,
    started_at: Instant,
    state: RetryState,
}

impl RetryMachine {
    pub(crate) fn new(policy: RetryPolicy, method: &Method, body_replayable: bool) -> Self {
        let max_attempts = if body_replayable && policy.method_supports_retry(method) {
            policy.max_attempts_value()
        } else {
            1
        };
        Self {
            policy,
            attempt: 1,
            max_attempts,
            started_at: Instant::now(),
            state: RetryState::Attempting,
        }
    }

    pub(crate) fn attempt(&self) -> usize {
        self.attempt
    }

    pub(crate) fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> RetryState {
        self.state
    }

    pub(crate) fn report(&mut self, report: &AttemptReport) -> RetryStep {
        debug_assert_eq!(self.state, RetryState::Attempting);

        if let AttemptReport::Status { status, .. } = report
            && !self.policy.is_retryable_status(*status)
        {
            self.state = RetryState::Succeeded;
            return RetryStep::Succeed;
        }

        if self.attempt >= self.max_attempts {
            self.state = RetryState::Failed;
            return RetryStep::Fail;
        }

        let delay = self.retry_delay(report);
        if let Some(max_elapsed) = self.policy.max_elapsed
            && self.started_at.elapsed() + delay >= max_elapsed
        {
            self.state = RetryState::Failed;
            return RetryStep::Fail;
        }

        self.state = RetryState::Retrying;
        RetryStep::Retry { delay }
    }

    fn retry_delay(&self, report: &AttemptReport) -> Duration {
        if let AttemptReport::Status {
            status,
            retry_after: Some(retry_after),
        } = report
            && self.policy.honors_retry_after(*status)
        {
            return match self.policy.max_retry_after {
                Some(cap) => (*retry_after).min(cap),
                None => *retry_after,
            };
        }
        self.policy.backoff_for_retry(self.attempt)
    }

    /// Moves `Retrying -> Attempting` once the backoff wait has completed.
    pub(crate) fn advance(&mut self) {
        debug_assert_eq!(self.state, RetryState::Retrying);
        self.attempt += 1;
        self.state = RetryState::Attempting;
        if self.policy.elapsed_basis == ElapsedBasis::LastAttempt {
            self.started_at = Instant::now();
        }
    }
}
