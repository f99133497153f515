//! Retry and circuit breaking for LLM calls.

use super::LlmProvider;
use crate::config::LlmConfig;
use crate::{Error, Result};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Generic resilient call: bounded attempts with doubling backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubled afterwards.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Backoff slept after the given failed attempt (1-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }

    /// Runs `call` until it succeeds, a non-retryable error occurs, or the
    /// attempts are exhausted. `call` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted.
    pub fn run<T>(&self, operation: &str, mut call: impl FnMut(u32) -> Result<T>) -> Result<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && is_retryable(&err) => {
                    let backoff = self.backoff_for(attempt);
                    tracing::warn!(
                        operation = operation,
                        attempt = attempt,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying call"
                    );
                    metrics::counter!("llm_retries_total", "operation" => operation.to_string())
                        .increment(1);
                    if !backoff.is_zero() {
                        std::thread::sleep(backoff);
                    }
                    attempt += 1;
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Like [`run`](Self::run) but recovers with `fallback` on failure.
    ///
    /// Returns the value and whether the fallback was used.
    pub fn run_or_else<T>(
        &self,
        operation: &str,
        call: impl FnMut(u32) -> Result<T>,
        fallback: impl FnOnce(&Error) -> T,
    ) -> (T, bool) {
        match self.run(operation, call) {
            Ok(value) => (value, false),
            Err(err) => {
                tracing::warn!(operation = operation, error = %err, "Falling back after failure");
                (fallback(&err), true)
            },
        }
    }
}

/// Whether an error is worth another attempt.
///
/// Configuration problems and client errors (other than rate limiting) fail
/// fast; transport errors, server errors and malformed output are retried.
fn is_retryable(err: &Error) -> bool {
    match err {
        Error::OperationFailed { cause, .. } => {
            let lower = cause.to_lowercase();
            if lower.contains("not set") || lower.contains("invalid api key") {
                return false;
            }
            if lower.contains("circuit breaker open") {
                return false;
            }
            if let Some(idx) = lower.find("status: 4") {
                return lower[idx..].starts_with("status: 429");
            }
            true
        },
        _ => false,
    }
}

/// Resilience configuration for LLM calls.
#[derive(Debug, Clone)]
pub struct LlmResilienceConfig {
    /// Retry policy applied to each call.
    pub retry: RetryPolicy,
    /// Consecutive failed calls before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout: Duration,
}

impl Default for LlmResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker_failure_threshold: 5,
            breaker_reset_timeout: Duration::from_secs(30),
        }
    }
}

impl LlmResilienceConfig {
    /// Loads resilience configuration from config file settings.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                initial_backoff: Duration::from_millis(config.retry_backoff_ms),
            },
            breaker_failure_threshold: config.breaker_failure_threshold.max(1),
            breaker_reset_timeout: Duration::from_millis(config.breaker_reset_ms),
        }
    }
}

/// Circuit breaker state machine.
#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    const fn new(config: &LlmResilienceConfig) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold,
            reset_timeout: config.breaker_reset_timeout,
        }
    }

    fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            },
            // One trial call at a time; it resolves the state either way.
            BreakerState::HalfOpen => false,
        }
    }

    const fn on_success(&mut self) {
        self.state = BreakerState::Closed { failures: 0 };
    }

    fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }

    const fn state_value(&self) -> u8 {
        match self.state {
            BreakerState::Closed { .. } => 0,
            BreakerState::Open { .. } => 1,
            BreakerState::HalfOpen => 2,
        }
    }
}

/// LLM provider wrapper with retries and a circuit breaker.
pub struct ResilientLlmProvider<P: LlmProvider> {
    inner: P,
    config: LlmResilienceConfig,
    breaker: Mutex<CircuitBreaker>,
}

impl<P: LlmProvider> ResilientLlmProvider<P> {
    /// Creates a new resilient LLM provider wrapper.
    #[must_use]
    pub fn new(inner: P, config: LlmResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(&config);
        Self {
            inner,
            config,
            breaker: Mutex::new(breaker),
        }
    }

    fn execute<T>(&self, operation: &'static str, mut call: impl FnMut() -> Result<T>) -> Result<T> {
        let provider: &'static str = self.inner.name();
        let span = tracing::info_span!(
            "llm.request",
            provider = provider,
            operation = operation,
            status = tracing::field::Empty
        );
        let _enter = span.enter();

        let allowed = self
            .breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .allow();
        if !allowed {
            span.record("status", "circuit_open");
            metrics::counter!(
                "llm_requests_total",
                "provider" => provider,
                "operation" => operation,
                "status" => "circuit_open"
            )
            .increment(1);
            return Err(Error::OperationFailed {
                operation: format!("llm_{operation}"),
                cause: "circuit breaker open".to_string(),
            });
        }

        let start = Instant::now();
        let result = self.config.retry.run(operation, |_| call());
        let status = if result.is_ok() { "success" } else { "error" };
        span.record("status", status);
        metrics::counter!(
            "llm_requests_total",
            "provider" => provider,
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            "llm_request_duration_ms",
            "provider" => provider,
            "operation" => operation
        )
        .record(start.elapsed().as_secs_f64() * 1000.0);

        let mut breaker = self
            .breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if result.is_ok() {
            breaker.on_success();
        } else if breaker.on_failure() {
            metrics::counter!("llm_circuit_breaker_trips_total", "provider" => provider)
                .increment(1);
            tracing::warn!(provider = provider, "LLM circuit breaker opened");
        }
        let state = breaker.state_value();
        drop(breaker);
        metrics::gauge!("llm_circuit_breaker_state", "provider" => provider)
            .set(f64::from(state));

        result
    }
}

impl<P: LlmProvider> LlmProvider for ResilientLlmProvider<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.execute("complete", || self.inner.complete(prompt))
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.execute("complete_with_system", || {
            self.inner.complete_with_system(system, user)
        })
    }
}
