//! # Core Error Types
//!
//! Centralized error definitions for the farm-core crate.
//! Operations handed to the executors return `anyhow::Result`; the types
//! below are what the crate itself produces.

use thiserror::Error;

/// Unified error type for farm-core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Config(ConfigError),

    #[error(transparent)]
    Retry(RetryError),

    #[error(transparent)]
    Log(LogError),
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        CoreError::Config(e)
    }
}

impl From<RetryError> for CoreError {
    fn from(e: RetryError) -> Self {
        CoreError::Retry(e)
    }
}

impl From<LogError> for CoreError {
    fn from(e: LogError) -> Self {
        CoreError::Log(e)
    }
}

/// Raised by the backoff executor once every allowed attempt has failed
/// with a retryable error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("Failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
}

/// Configuration-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to load config from {path}: {msg}")]
    Load { path: String, msg: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Transaction log export errors
#[derive(Error, Debug, Clone)]
pub enum LogError {
    #[error("I/O error writing {path}: {msg}")]
    Io { path: String, msg: String },
}
