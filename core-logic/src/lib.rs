//! # Farm Core - Resilient Execution for Testnet Automation
//!
//! Shared utilities for cycling wallets through on-chain tasks: retry with
//! exponential backoff, gas price escalation, a structured transaction log
//! and a multi-wallet loop runner.
//!
//! ## Modules
//!
//! - [`config`] - TOML configuration (retry, gas, logging, delays, run)
//! - [`error`] - Typed error handling with thiserror
//! - [`traits`] - `Task` / `Actor` seams used by the runner
//!
//! The executors are usually nested: the backoff executor retries the whole
//! attempt on transient errors, and each attempt runs a gas escalation loop.
//!
//! ```rust,no_run
//! use farm_core::{BackoffExecutor, GasEscalationExecutor, LogContext};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let ctx = LogContext::new("0x1234567890abcdef1234567890abcdef12345678", "Uniswap", "Swap");
//! let backoff = BackoffExecutor::default();
//! let gas = GasEscalationExecutor::default();
//!
//! let hash: String = backoff
//!     .run(Some(&ctx), || {
//!         let (gas, ctx) = (gas.clone(), ctx.clone());
//!         async move {
//!             gas.run(&ctx, |multiplier| async move {
//!                 // submit the transaction with `multiplier` applied to the fee
//!                 Ok(format!("0xhash@{multiplier}"))
//!             })
//!             .await
//!         }
//!     })
//!     .await?;
//! # let _ = hash;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub(crate) mod utils;

pub use config::{
    DelayRange, DelaySettings, FarmConfig, GasSettings, LoggingSettings, ModuleOrder,
    RetrySettings, RunSettings,
};
pub use error::{ConfigError, CoreError, LogError, RetryError};
pub use traits::{Actor, RunStats, Task, TaskResult};

pub use utils::setup_logger;

pub use utils::clock::{random_delay, Sleeper, TokioSleeper};
pub use utils::gas::{
    gwei_to_wei, is_fee_error, is_fee_error_message, scale_fee, GasEscalationExecutor, GasPolicy,
    GAS_RETRY_DELAY,
};
pub use utils::retry::{
    classify_message, draw_jitter, error_message, is_retryable, is_retryable_message,
    with_backoff, AttemptOutcome, AttemptState, BackoffExecutor, ErrorClass, RetryPolicy, TxRef,
    JITTER_MAX, JITTER_MIN,
};
pub use utils::runner::{FarmRunner, TaskContext};
pub use utils::tx_logger::{
    truncate_actor, LogContext, LogEntry, LogLevel, LogSummary, ModuleStats, TransactionLogger,
    TxLog,
};
