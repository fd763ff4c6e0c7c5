use crate::utils::runner::TaskContext;
use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub success: u64,
    pub failed: u64,
}

impl RunStats {
    pub fn total(&self) -> u64 {
        self.success + self.failed
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.success as f64 / total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub success: bool,
    pub message: String,
    pub tx_hash: Option<String>,
}

impl TaskResult {
    pub fn ok(message: impl Into<String>, tx_hash: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            tx_hash,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            tx_hash: None,
        }
    }
}

/// Something that performs tasks, usually a wallet.
pub trait Actor: Send + Sync {
    /// Identifier used in transaction logs (the wallet address).
    fn actor_id(&self) -> String;
}

impl Actor for String {
    fn actor_id(&self) -> String {
        self.clone()
    }
}

#[async_trait]
pub trait Task<A: Actor>: Send + Sync {
    /// Module name used in logs, e.g. "Uniswap"
    fn name(&self) -> &str;

    /// Executes the task for one actor
    async fn run(&self, actor: &A, ctx: &TaskContext) -> Result<TaskResult>;
}
