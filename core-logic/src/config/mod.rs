//! # Farm Configuration
//!
//! TOML configuration loaded with the `config` crate. Every section is
//! optional and falls back to the defaults below. Values can be overridden
//! from the environment with the `FARM__` prefix, e.g.
//! `FARM__RETRY__MAX_RETRIES=5`.

use crate::error::ConfigError;
use crate::utils::gas::GasPolicy;
use crate::utils::logger;
use crate::utils::retry::RetryPolicy;
use crate::utils::tx_logger::TransactionLogger;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 5000,
            max_delay_ms: 30000,
            factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSettings {
    pub max_retries: u32,
    pub initial_multiplier: f64,
    pub max_multiplier: f64,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_multiplier: 1.1,
            max_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub enable_file_logging: bool,
    pub log_file_path: String,
    pub console_colors: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enable_file_logging: true,
            log_file_path: "./transaction-logs.txt".to_string(),
            console_colors: true,
        }
    }
}

/// Inclusive millisecond range a random delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min: u64,
    pub max: u64,
}

impl DelayRange {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn sample(&self) -> Duration {
        crate::utils::clock::random_delay(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySettings {
    pub between_modules: DelayRange,
    pub between_wallets: DelayRange,
    pub between_loops: DelayRange,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            between_modules: DelayRange::new(2000, 5000),
            between_wallets: DelayRange::new(10000, 30000),
            between_loops: DelayRange::new(30000, 60000),
        }
    }
}

impl DelaySettings {
    /// No waiting at all; handy for dry runs.
    pub fn none() -> Self {
        Self {
            between_modules: DelayRange::new(0, 0),
            between_wallets: DelayRange::new(0, 0),
            between_loops: DelayRange::new(0, 0),
        }
    }
}

/// Visiting order for modules within a wallet, and for wallets within a loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleOrder {
    #[default]
    Sequential,
    Random,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub loop_count: u32,
    pub module_order: ModuleOrder,
    /// Reshuffled at the start of every loop when `Random`.
    pub wallet_order: ModuleOrder,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            loop_count: 1,
            module_order: ModuleOrder::Sequential,
            wallet_order: ModuleOrder::Sequential,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    pub retry: RetrySettings,
    pub gas: GasSettings,
    pub logging: LoggingSettings,
    pub delays: DelaySettings,
    pub run: RunSettings,
}

impl FarmConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string(),
            });
        }

        let settings = Config::builder()
            .add_source(File::from(Path::new(path)))
            .add_source(
                Environment::with_prefix("FARM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Load {
                path: path.to_string(),
                msg: e.to_string(),
            })?;

        let config: Self = settings.try_deserialize().map_err(|e| ConfigError::Load {
            path: path.to_string(),
            msg: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load {
                path: "<inline>".to_string(),
                msg: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_policy().validate()?;
        self.gas_policy().validate()?;

        let ranges = [
            ("delays.between_modules", self.delays.between_modules),
            ("delays.between_wallets", self.delays.between_wallets),
            ("delays.between_loops", self.delays.between_loops),
        ];
        for (field, range) in ranges {
            if range.min > range.max {
                return Err(ConfigError::invalid(
                    field,
                    format!("min {} exceeds max {}", range.min, range.max),
                ));
            }
        }

        if self.run.loop_count == 0 {
            return Err(ConfigError::invalid("run.loop_count", "must be at least 1"));
        }
        if self.logging.enable_file_logging && self.logging.log_file_path.trim().is_empty() {
            return Err(ConfigError::invalid(
                "logging.log_file_path",
                "required when file logging is enabled",
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            factor: self.retry.factor,
        }
    }

    pub fn gas_policy(&self) -> GasPolicy {
        GasPolicy {
            max_retries: self.gas.max_retries,
            initial_multiplier: self.gas.initial_multiplier,
            max_multiplier: self.gas.max_multiplier,
        }
    }

    /// Installs the tracing subscriber with `[logging].console_colors`.
    /// See [`setup_logger`](crate::setup_logger).
    pub fn setup_logger(&self, log_dir: &str) -> Option<WorkerGuard> {
        logger::setup_logger(log_dir, self.logging.console_colors)
    }

    /// Transaction logger honouring the `[logging]` section.
    pub fn transaction_logger(&self) -> TransactionLogger {
        if self.logging.enable_file_logging {
            TransactionLogger::with_file(&self.logging.log_file_path)
        } else {
            TransactionLogger::in_memory()
        }
    }
}
