//! # Gas Escalation
//!
//! Re-submits a fee-parameterized operation with a linearly rising gas price
//! multiplier while failures look fee-related (`gas`, `underpriced`, `fee`).
//! Independent of the backoff executor; callers usually nest this inside a
//! [`BackoffExecutor`](super::retry::BackoffExecutor) run.

use crate::error::ConfigError;
use crate::utils::clock::{Sleeper, TokioSleeper};
use crate::utils::retry::{error_message, AttemptOutcome, AttemptState, TxRef};
use crate::utils::tx_logger::{LogContext, LogLevel, TxLog};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::RegexSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Wait between fee-related retries.
pub const GAS_RETRY_DELAY: Duration = Duration::from_millis(2000);

static FEE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([r"(?i)gas", r"(?i)underpriced", r"(?i)fee"]).expect("static fee patterns")
});

/// Pure, case-insensitive check for fee-related failure messages.
pub fn is_fee_error_message(message: &str) -> bool {
    FEE_PATTERNS.is_match(message)
}

pub fn is_fee_error(error: &anyhow::Error) -> bool {
    is_fee_error_message(&error_message(error))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasPolicy {
    pub max_retries: u32,
    pub initial_multiplier: f64,
    pub max_multiplier: f64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_multiplier: 1.1,
            max_multiplier: 2.0,
        }
    }
}

impl GasPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_multipliers(mut self, initial: f64, max: f64) -> Self {
        self.initial_multiplier = initial;
        self.max_multiplier = max;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("gas.max_retries", "must be at least 1"));
        }
        if self.initial_multiplier.is_nan() || self.initial_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "gas.initial_multiplier",
                format!("{} is below 1.0", self.initial_multiplier),
            ));
        }
        if self.max_multiplier.is_nan() || self.max_multiplier <= self.initial_multiplier {
            return Err(ConfigError::invalid(
                "gas.max_multiplier",
                format!(
                    "{} must exceed initial multiplier {}",
                    self.max_multiplier, self.initial_multiplier
                ),
            ));
        }
        Ok(())
    }

    /// Multiplier for attempt `attempt` (1-based), interpolated linearly from
    /// `initial_multiplier` to `max_multiplier` over `max_retries` attempts.
    /// A single-attempt policy always uses `initial_multiplier`.
    pub fn multiplier(&self, attempt: u32) -> f64 {
        if self.max_retries <= 1 {
            return self.initial_multiplier;
        }
        let index = attempt.saturating_sub(1).min(self.max_retries - 1);
        let step = (self.max_multiplier - self.initial_multiplier) / (self.max_retries - 1) as f64;
        self.initial_multiplier + step * index as f64
    }

    /// `RetryableFailure` here means a fee-related failure.
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

/// Convert gwei to wei
pub fn gwei_to_wei(gwei: f64) -> u128 {
    (gwei * 1e9) as u128
}

/// Scales a fee in wei by `multiplier`, rounded to 1/1000 precision so the
/// result stays exact for integer fees. Saturates at `u128::MAX`.
pub fn scale_fee(wei: u128, multiplier: f64) -> u128 {
    let per_mille = (multiplier * 1000.0).round().max(0.0) as u128;
    match wei.checked_mul(per_mille) {
        Some(product) => product / 1000,
        None => (wei / 1000)
            .saturating_mul(per_mille)
            .saturating_add(wei % 1000 * per_mille / 1000),
    }
}

fn percent(multiplier: f64) -> String {
    format!("{:.0}%", multiplier * 100.0)
}

/// Retries fee-related failures with an increasing gas price multiplier.
#[derive(Clone)]
pub struct GasEscalationExecutor {
    policy: GasPolicy,
    logger: Option<Arc<dyn TxLog>>,
    sleeper: Arc<dyn Sleeper>,
}

impl GasEscalationExecutor {
    pub fn new(policy: GasPolicy) -> Self {
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

    pub fn policy(&self) -> &GasPolicy {
        &self.policy
    }

    /// Calls `operation(multiplier)` until it succeeds, fails with a non-fee
    /// error, or the attempts run out. Failures are returned unmodified.
    pub async fn run<T, F, Fut>(&self, context: &LogContext, mut operation: F) -> Result<T>
    where
        T: TxRef,
        F: FnMut(f64) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.policy.validate()?;

        let max = self.policy.max_retries;
        let mut state = AttemptState::Attempting(1);
        loop {
            let attempt = match state {
                AttemptState::Attempting(n) => n,
                AttemptState::WaitingBackoff(_) => {
                    self.sleeper.sleep(GAS_RETRY_DELAY).await;
                    state = state.resume();
                    continue;
                }
                terminal => unreachable!("gas loop reached terminal state {:?}", terminal),
            };

            let multiplier = self.policy.multiplier(attempt);
            if attempt > 1 {
                let details = format!(
                    "Retrying with {} gas price (Attempt {}/{})",
                    percent(multiplier),
                    attempt,
                    max
                );
                self.emit(context, LogLevel::Warning, None, &details);
            }
            debug!("{} attempt {} with gas x{:.3}", context.action, attempt, multiplier);

            let error = match operation(multiplier).await {
                Ok(result) => {
                    if attempt > 1 {
                        let details = format!(
                            "Completed successfully with {} gas price on attempt {}",
                            percent(multiplier),
                            attempt
                        );
                        self.emit(context, LogLevel::Success, result.tx_ref().as_deref(), &details);
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            let message = error_message(&error);
            let outcome = if is_fee_error_message(&message) {
                AttemptOutcome::RetryableFailure
            } else {
                AttemptOutcome::FatalFailure
            };

            state = self.policy.transition(attempt, outcome);
            if state.is_terminal() {
                self.emit(context, LogLevel::Error, None, &format!("Failed: {}", message));
                return Err(error);
            }
            let details = format!("Gas error on attempt {}: {}", attempt, message);
            self.emit(context, LogLevel::Warning, None, &details);
        }
    }

    fn emit(&self, ctx: &LogContext, level: LogLevel, tx_ref: Option<&str>, details: &str) {
        if let Some(logger) = &self.logger {
            logger.record(level, &ctx.actor_id, &ctx.module, &ctx.action, tx_ref, Some(details));
        }
    }
}

impl Default for GasEscalationExecutor {
    fn default() -> Self {
        Self::new(GasPolicy::default())
    }
}
