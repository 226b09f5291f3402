//! Budgeted retry policy.
//!
//! The budget is a wall-clock ceiling measured from the first attempt. After a failure the policy
//! stops with that failure once the budget is spent, retries when its predicate approves, and
//! stops otherwise. There is always at least one attempt, and an exhausted budget surfaces the
//! last underlying error rather than a generic timeout.

use crate::config::{RetryConfig, RetryMatching};
use crate::error::{classify_message, ErrorKind, OrchestratorError, OrchestratorResult};
use crate::metrics;
use opentelemetry::KeyValue;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Decides whether a failed call is worth another attempt
pub trait RetryPredicate: Send + Sync + Debug {
    fn should_retry(&self, error: &OrchestratorError) -> bool;
}

/// Retries transient failures, judged by the typed error kind
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorKindPredicate;

impl RetryPredicate for ErrorKindPredicate {
    fn should_retry(&self, error: &OrchestratorError) -> bool {
        error.kind() == ErrorKind::Transient
    }
}

/// Retries transient failures, judged from the rendered error message.
///
/// For peers where only a string crosses the boundary. It agrees with [`ErrorKindPredicate`] on
/// every [`OrchestratorError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyMessagePredicate;

impl RetryPredicate for LegacyMessagePredicate {
    fn should_retry(&self, error: &OrchestratorError) -> bool {
        classify_message(&error.to_string()) == ErrorKind::Transient
    }
}

pub fn predicate_for(matching: RetryMatching) -> Arc<dyn RetryPredicate> {
    match matching {
        RetryMatching::Kind => Arc::new(ErrorKindPredicate),
        RetryMatching::LegacyMessage => Arc::new(LegacyMessagePredicate),
    }
}

/// What an attempt knows about the attempts before it
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// 1-based number of the attempt about to run
    pub attempt: u32,
    /// Time since the first attempt started
    pub elapsed: Duration,
    /// Error of the previous attempt
    pub last_error: Option<OrchestratorError>,
}

impl RetryState {
    /// The previous attempt ended in a timeout, so it may have executed remotely
    pub fn previous_timed_out(&self) -> bool {
        self.last_error
            .as_ref()
            .is_some_and(OrchestratorError::is_timeout)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    budget: Duration,
    delay: Duration,
    predicate: Arc<dyn RetryPredicate>,
}

impl RetryPolicy {
    pub fn new(budget: Duration, delay: Duration, predicate: Arc<dyn RetryPredicate>) -> Self {
        Self {
            budget,
            delay,
            predicate,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.budget(), config.delay(), predicate_for(config.matching))
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn should_retry(&self, error: &OrchestratorError) -> bool {
        self.predicate.should_retry(error)
    }

    /// Run `operation` until it succeeds, the predicate refuses, or the budget is spent
    pub async fn run<T, F, Fut>(&self, method: &str, mut operation: F) -> OrchestratorResult<T>
    where
        F: FnMut(RetryState) -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let started = Instant::now();
        let mut state = RetryState::default();

        loop {
            state.attempt += 1;
            state.elapsed = started.elapsed();

            let error = match operation(state.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let elapsed = started.elapsed();
            if elapsed > self.budget {
                warn!(
                    method = %method,
                    attempts = state.attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error,
                    "🔁 RETRY: budget exhausted"
                );
                return Err(error);
            }
            if !self.predicate.should_retry(&error) {
                debug!(method = %method, attempts = state.attempt, error = %error, "RETRY: not retryable");
                return Err(error);
            }

            debug!(
                method = %method,
                attempt = state.attempt,
                error = %error,
                "🔁 RETRY: retrying ledger call"
            );
            metrics::ledger_retries_total().add(1, &[KeyValue::new("method", method.to_string())]);
            state.last_error = Some(error);
            tokio::time::sleep(self.delay).await;
        }
    }
}
