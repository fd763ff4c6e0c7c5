//! # Transaction Logger
//!
//! Structured per-wallet activity log. The executors report through the
//! [`TxLog`] trait; [`TransactionLogger`] is the default sink, keeping an
//! in-memory history and optionally appending one line per entry to a file:
//!
//! ```text
//! [<ISO timestamp>] [<module>] [<STATUS>] Wallet <0x1234...abcd> performed <action> - TX: <hash> - Details: <details>
//! ```

use crate::error::LogError;
use crate::utils::logger::TX_LOG_TARGET;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub actor_short: String,
    pub actor_id: String,
    pub module: String,
    pub action: String,
    pub status: LogLevel,
    pub tx_ref: Option<String>,
    pub details: Option<String>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        actor_id: &str,
        module: &str,
        action: &str,
        tx_ref: Option<&str>,
        details: Option<&str>,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            actor_short: truncate_actor(actor_id),
            actor_id: actor_id.to_string(),
            module: module.to_string(),
            action: action.to_string(),
            status: level,
            tx_ref: tx_ref.map(str::to_string),
            details: details.map(str::to_string),
        }
    }

    /// Single-line form written to the file sink (without trailing newline).
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "[{}] [{}] [{}] Wallet {} performed {}",
            self.timestamp, self.module, self.status, self.actor_short, self.action
        );
        if let Some(tx) = &self.tx_ref {
            line.push_str(&format!(" - TX: {}", tx));
        }
        if let Some(details) = &self.details {
            line.push_str(&format!(" - Details: {}", details));
        }
        line
    }
}

/// `0x1234567890...` -> `0x1234...abcd`. Short ids are returned unchanged.
pub fn truncate_actor(actor_id: &str) -> String {
    let chars: Vec<char> = actor_id.chars().collect();
    if chars.len() <= 10 {
        return actor_id.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Who did what: the actor (usually a wallet address), the module and the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    pub actor_id: String,
    pub module: String,
    pub action: String,
}

impl LogContext {
    pub fn new(
        actor_id: impl Into<String>,
        module: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            module: module.into(),
            action: action.into(),
        }
    }

    pub fn with_action(&self, action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..self.clone()
        }
    }
}

/// Logger collaborator used by the executors and the runner.
///
/// Implementations must not fail: a broken sink is reported elsewhere and
/// the entry is still returned.
pub trait TxLog: Send + Sync {
    fn record(
        &self,
        level: LogLevel,
        actor_id: &str,
        module: &str,
        action: &str,
        tx_ref: Option<&str>,
        details: Option<&str>,
    ) -> LogEntry;

    fn log_info(
        &self,
        actor_id: &str,
        module: &str,
        action: &str,
        tx_ref: Option<&str>,
        details: Option<&str>,
    ) -> LogEntry {
        self.record(LogLevel::Info, actor_id, module, action, tx_ref, details)
    }

    fn log_success(
        &self,
        actor_id: &str,
        module: &str,
        action: &str,
        tx_ref: Option<&str>,
        details: Option<&str>,
    ) -> LogEntry {
        self.record(LogLevel::Success, actor_id, module, action, tx_ref, details)
    }

    fn log_warning(
        &self,
        actor_id: &str,
        module: &str,
        action: &str,
        tx_ref: Option<&str>,
        details: Option<&str>,
    ) -> LogEntry {
        self.record(LogLevel::Warning, actor_id, module, action, tx_ref, details)
    }

    fn log_error(
        &self,
        actor_id: &str,
        module: &str,
        action: &str,
        tx_ref: Option<&str>,
        details: Option<&str>,
    ) -> LogEntry {
        self.record(LogLevel::Error, actor_id, module, action, tx_ref, details)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleStats {
    pub total: u64,
    pub success: u64,
    pub error: u64,
    /// Percentage of SUCCESS entries, `None` when the module has no entries.
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogSummary {
    pub total_entries: usize,
    pub wallets_used: usize,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub module_stats: BTreeMap<String, ModuleStats>,
}

impl LogSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Default [`TxLog`] implementation.
#[derive(Debug, Default)]
pub struct TransactionLogger {
    history: Mutex<Vec<LogEntry>>,
    file_path: Option<PathBuf>,
}

impl TransactionLogger {
    /// Logger that only keeps entries in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Logger that also appends every entry to `path`.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            history: Mutex::new(Vec::new()),
            file_path: Some(path.into()),
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn history(&self) -> Vec<LogEntry> {
        self.lock_history().clone()
    }

    pub fn wallet_history(&self, actor_id: &str) -> Vec<LogEntry> {
        self.lock_history()
            .iter()
            .filter(|e| e.actor_id.eq_ignore_ascii_case(actor_id))
            .cloned()
            .collect()
    }

    pub fn module_history(&self, module: &str) -> Vec<LogEntry> {
        self.lock_history()
            .iter()
            .filter(|e| e.module == module)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> LogSummary {
        let history = self.lock_history();

        let wallets_used = history
            .iter()
            .map(|e| e.actor_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let mut module_stats: BTreeMap<String, ModuleStats> = BTreeMap::new();
        for entry in history.iter() {
            let stats = module_stats.entry(entry.module.clone()).or_default();
            stats.total += 1;
            match entry.status {
                LogLevel::Success => stats.success += 1,
                LogLevel::Error => stats.error += 1,
                _ => {}
            }
        }
        for stats in module_stats.values_mut() {
            stats.success_rate = if stats.total > 0 {
                Some(stats.success as f64 / stats.total as f64 * 100.0)
            } else {
                None
            };
        }

        LogSummary {
            total_entries: history.len(),
            wallets_used,
            start_time: history.first().map(|e| e.timestamp.clone()),
            end_time: history.last().map(|e| e.timestamp.clone()),
            module_stats,
        }
    }

    /// Writes the whole history as CSV. Commas inside details become `;`.
    pub fn export_csv(&self, path: impl AsRef<Path>) -> Result<PathBuf, LogError> {
        let path = path.as_ref();
        let mut csv = String::from("Timestamp,Wallet,Module,Action,Status,TxHash,Details\n");
        for entry in self.lock_history().iter() {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{}\n",
                entry.timestamp,
                entry.actor_id,
                entry.module,
                entry.action,
                entry.status,
                entry.tx_ref.as_deref().unwrap_or(""),
                entry.details.as_deref().unwrap_or("").replace(',', ";"),
            ));
        }

        fs::write(path, csv).map_err(|e| LogError::Io {
            path: path.display().to_string(),
            msg: e.to_string(),
        })?;
        Ok(path.to_path_buf())
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
        // A poisoned history is still a valid Vec.
        self.history.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn append_to_file(&self, entry: &LogEntry) {
        let Some(path) = &self.file_path else {
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{}", entry.to_line()));
        if let Err(e) = result {
            error!("Error writing to log file {}: {}", path.display(), e);
        }
    }
}

impl TxLog for TransactionLogger {
    fn record(
        &self,
        level: LogLevel,
        actor_id: &str,
        module: &str,
        action: &str,
        tx_ref: Option<&str>,
        details: Option<&str>,
    ) -> LogEntry {
        let entry = LogEntry::new(level, actor_id, module, action, tx_ref, details);

        let suffix = details.map(|d| format!(" - {}", d)).unwrap_or_default();
        match level {
            LogLevel::Info | LogLevel::Success => info!(
                target: TX_LOG_TARGET,
                "[{}] [{}] {} {}{}",
                entry.actor_short, module, level, action, suffix
            ),
            LogLevel::Warning => warn!(
                target: TX_LOG_TARGET,
                "[{}] [{}] {} {}{}",
                entry.actor_short, module, level, action, suffix
            ),
            LogLevel::Error => error!(
                target: TX_LOG_TARGET,
                "[{}] [{}] {} {}{}",
                entry.actor_short, module, level, action, suffix
            ),
        }

        // file line order must match history order
        let mut history = self.lock_history();
        self.append_to_file(&entry);
        history.push(entry.clone());
        entry
    }
}
