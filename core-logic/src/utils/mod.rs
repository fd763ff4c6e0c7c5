//! # Utilities Module
//!
//! Internal utility modules for the farm-core crate.
//! These modules are marked as `pub(crate)` to enforce API boundaries;
//! the public surface is re-exported from `lib.rs`.

pub(crate) mod clock;
pub(crate) mod gas;
pub(crate) mod logger;
pub(crate) mod retry;
pub(crate) mod runner;
pub(crate) mod tx_logger;

pub use logger::setup_logger;
