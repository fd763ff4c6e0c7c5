//! # Backoff Executor
//!
//! Runs an async operation, retrying transient failures with exponential,
//! jittered delay. Whether a failure is transient is decided from its
//! message against the pattern table in [`classify_message`].
//!
//! Attempts are driven by a small state machine ([`AttemptState`]) whose
//! transitions are pure functions of the policy, the attempt number and the
//! attempt outcome; the only side effects are the operation itself, the
//! logger and the injected [`Sleeper`].

use crate::error::{ConfigError, RetryError};
use crate::traits::TaskResult;
use crate::utils::clock::{Sleeper, TokioSleeper};
use crate::utils::tx_logger::{LogContext, LogLevel, TxLog};
use anyhow::Result;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::RegexSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const JITTER_MIN: f64 = 0.85;
pub const JITTER_MAX: f64 = 1.15;

/// Anything an operation may return; exposes the transaction hash, if any,
/// for the success log line.
pub trait TxRef {
    fn tx_ref(&self) -> Option<String>;
}

impl TxRef for () {
    fn tx_ref(&self) -> Option<String> {
        None
    }
}

impl TxRef for bool {
    fn tx_ref(&self) -> Option<String> {
        None
    }
}

impl TxRef for String {
    fn tx_ref(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl<T: TxRef> TxRef for Option<T> {
    fn tx_ref(&self) -> Option<String> {
        self.as_ref().and_then(TxRef::tx_ref)
    }
}

impl TxRef for TaskResult {
    fn tx_ref(&self) -> Option<String> {
        self.tx_hash.clone()
    }
}

impl TxRef for serde_json::Value {
    fn tx_ref(&self) -> Option<String> {
        ["hash", "transactionHash"]
            .iter()
            .find_map(|key| self.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(5000),
            max_delay: Duration::from_millis(30000),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay_ms: u64) -> Self {
        self.max_delay = Duration::from_millis(max_delay_ms);
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("retry.max_retries", "must be at least 1"));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                format!(
                    "{}ms is below initial delay {}ms",
                    self.max_delay.as_millis(),
                    self.initial_delay.as_millis()
                ),
            ));
        }
        if self.factor.is_nan() || self.factor <= 1.0 {
            return Err(ConfigError::invalid(
                "retry.factor",
                format!("{} must be greater than 1", self.factor),
            ));
        }
        Ok(())
    }

    /// Un-jittered wait after failed attempt `attempt` (1-based):
    /// `min(initial * factor^(attempt-1), max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.factor.powi(exp);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// `base_delay(attempt)` scaled by `jitter`, truncated to whole milliseconds
    /// and kept inside `[ceil(base * 0.85), floor(base * 1.15)]`.
    pub fn jittered_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let base_ms = self.base_delay(attempt).as_millis() as u64;
        let low = (base_ms * 85).div_ceil(100);
        let high = base_ms * 115 / 100;
        // epsilon absorbs float noise such as 2000 * 1.15 = 2299.9999...
        let scaled = (base_ms as f64 * jitter + 1e-6).floor() as u64;
        Duration::from_millis(scaled.clamp(low, high))
    }

    pub fn transition(&self, attempt: u32, outcome: AttemptOutcome) -> AttemptState {
        match outcome {
            AttemptOutcome::Success => AttemptState::Success,
            AttemptOutcome::FatalFailure => AttemptState::FatalFailure,
            AttemptOutcome::RetryableFailure if attempt >= self.max_retries => {
                AttemptState::ExhaustedFailure
            }
            AttemptOutcome::RetryableFailure => AttemptState::WaitingBackoff(attempt),
        }
    }
}

/// Uniform jitter factor in `[JITTER_MIN, JITTER_MAX]`.
pub fn draw_jitter() -> f64 {
    rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Attempting(u32),
    /// Waiting after failed attempt `n`.
    WaitingBackoff(u32),
    Success,
    FatalFailure,
    ExhaustedFailure,
}

impl AttemptState {
    /// Leaves the waiting state for the next attempt; other states are unchanged.
    pub fn resume(self) -> Self {
        match self {
            AttemptState::WaitingBackoff(n) => AttemptState::Attempting(n + 1),
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Success | AttemptState::FatalFailure | AttemptState::ExhaustedFailure
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Network,
    Rpc,
    Chain,
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::Fatal)
    }
}

static NETWORK_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)network error",
        r"(?i)timeout",
        r"(?i)timed out",
        r"(?i)connection refused",
        r"(?i)connection reset",
        r"(?i)connection closed",
        r"(?i)not connected",
        r"(?i)etimedout",
        r"(?i)econnrefused",
        r"(?i)econnreset",
        r"(?i)enotfound",
        r"(?i)eai_again",
        r"(?i)unexpected end of file",
    ])
    .expect("static network patterns")
});

static RPC_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)server error",
        r"(?i)invalid json response",
        r"(?i)too many requests",
        r"(?i)rate limited",
        r"(?i)server busy",
    ])
    .expect("static rpc patterns")
});

static CHAIN_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)transaction underpriced",
        r"(?i)transaction replaced",
        r"(?i)nonce too low",
        r"(?i)insufficient funds for gas",
        r"(?i)gas price too low",
        r"(?i)cannot estimate gas",
        r"(?i)execution reverted",
        r"(?i)intrinsic gas too low",
    ])
    .expect("static chain patterns")
});

/// Pure classification of a failure message. Case-insensitive.
pub fn classify_message(message: &str) -> ErrorClass {
    if NETWORK_PATTERNS.is_match(message) {
        ErrorClass::Network
    } else if RPC_PATTERNS.is_match(message) {
        ErrorClass::Rpc
    } else if CHAIN_PATTERNS.is_match(message) {
        ErrorClass::Chain
    } else {
        ErrorClass::Fatal
    }
}

pub fn is_retryable_message(message: &str) -> bool {
    classify_message(message).is_retryable()
}

pub fn is_retryable(error: &anyhow::Error) -> bool {
    is_retryable_message(&error_message(error))
}

/// Message of an error including its context chain.
pub fn error_message(error: &anyhow::Error) -> String {
    format!("{:#}", error)
}

/// Retries an operation on transient failures with exponential backoff.
///
/// Holds only configuration and capabilities; every [`run`](Self::run)
/// keeps its own attempt counter.
#[derive(Clone)]
pub struct BackoffExecutor {
    policy: RetryPolicy,
    logger: Option<Arc<dyn TxLog>>,
    sleeper: Arc<dyn Sleeper>,
}

impl BackoffExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            logger: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn TxLog>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails fatally, or `max_retries`
    /// attempts have failed.
    ///
    /// Fatal errors are returned as-is. Exhaustion returns
    /// [`RetryError::Exhausted`] wrapped in `anyhow::Error`. An invalid
    /// policy fails with a [`ConfigError`] before the first attempt.
    pub async fn run<T, F, Fut>(&self, context: Option<&LogContext>, mut operation: F) -> Result<T>
    where
        T: TxRef,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.policy.validate()?;

        if let Some(ctx) = context {
            let action = format!("Starting {}", ctx.action);
            self.emit(Some(&ctx.with_action(action)), LogLevel::Info, None, None);
        }

        let mut state = AttemptState::Attempting(1);
        loop {
            let attempt = match state {
                AttemptState::Attempting(n) => n,
                AttemptState::WaitingBackoff(n) => {
                    let delay = self.policy.jittered_delay(n, draw_jitter());
                    debug!(
                        "Retrying in {}ms... (Attempt {}/{})",
                        delay.as_millis(),
                        n,
                        self.policy.max_retries
                    );
                    self.sleeper.sleep(delay).await;
                    state = state.resume();
                    continue;
                }
                terminal => unreachable!("retry loop reached terminal state {:?}", terminal),
            };

            let error = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        let details = format!("Completed successfully on retry attempt {}", attempt);
                        self.emit(
                            context,
                            LogLevel::Success,
                            result.tx_ref().as_deref(),
                            Some(&details),
                        );
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            let message = error_message(&error);
            let outcome = if is_retryable_message(&message) {
                AttemptOutcome::RetryableFailure
            } else {
                AttemptOutcome::FatalFailure
            };

            state = self.policy.transition(attempt, outcome);
            match state {
                AttemptState::FatalFailure => {
                    let details = format!("Fatal error: {}", message);
                    self.emit(context, LogLevel::Error, None, Some(&details));
                    return Err(error);
                }
                AttemptState::ExhaustedFailure => {
                    let exhausted = RetryError::Exhausted {
                        attempts: self.policy.max_retries,
                        message,
                    };
                    self.emit(context, LogLevel::Error, None, Some(&exhausted.to_string()));
                    return Err(exhausted.into());
                }
                _ => {
                    let details = format!("Error on attempt {}: {}", attempt, message);
                    self.emit(context, LogLevel::Warning, None, Some(&details));
                }
            }
        }
    }

    fn emit(
        &self,
        context: Option<&LogContext>,
        level: LogLevel,
        tx_ref: Option<&str>,
        details: Option<&str>,
    ) {
        if let (Some(logger), Some(ctx)) = (&self.logger, context) {
            logger.record(level, &ctx.actor_id, &ctx.module, &ctx.action, tx_ref, details);
        }
    }
}

impl Default for BackoffExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// One-shot backoff run without logging.
pub async fn with_backoff<T, F, Fut>(policy: RetryPolicy, operation: F) -> Result<T>
where
    T: TxRef,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    BackoffExecutor::new(policy).run(None, operation).await
}
