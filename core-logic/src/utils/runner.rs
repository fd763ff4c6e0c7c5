use crate::config::{DelayRange, DelaySettings, FarmConfig, ModuleOrder, RunSettings};
use crate::traits::{Actor, RunStats, Task};
use crate::utils::clock::{Sleeper, TokioSleeper};
use crate::utils::gas::{GasEscalationExecutor, GasPolicy};
use crate::utils::retry::{error_message, BackoffExecutor, RetryPolicy};
use crate::utils::tx_logger::{truncate_actor, LogContext, TxLog};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

/// Everything a task needs to report and retry its chain calls.
#[derive(Clone)]
pub struct TaskContext {
    pub actor_id: String,
    pub module: String,
    pub logger: Arc<dyn TxLog>,
    pub backoff: BackoffExecutor,
    pub gas: GasEscalationExecutor,
}

impl TaskContext {
    pub fn log_context(&self, action: impl Into<String>) -> LogContext {
        LogContext::new(self.actor_id.clone(), self.module.clone(), action)
    }
}

/// Cycles every actor through every task, `loop_count` times, with random
/// pauses between tasks, actors and loops.
pub struct FarmRunner<A: Actor> {
    tasks: Vec<Arc<dyn Task<A>>>,
    logger: Arc<dyn TxLog>,
    retry_policy: RetryPolicy,
    gas_policy: GasPolicy,
    delays: DelaySettings,
    settings: RunSettings,
    sleeper: Arc<dyn Sleeper>,
}

impl<A: Actor> FarmRunner<A> {
    pub fn new(logger: Arc<dyn TxLog>) -> Self {
        Self {
            tasks: Vec::new(),
            logger,
            retry_policy: RetryPolicy::default(),
            gas_policy: GasPolicy::default(),
            delays: DelaySettings::default(),
            settings: RunSettings::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn from_config(config: &FarmConfig, logger: Arc<dyn TxLog>) -> Self {
        Self::new(logger)
            .with_policies(config.retry_policy(), config.gas_policy())
            .with_delays(config.delays.clone())
            .with_run_settings(config.run.clone())
    }

    pub fn with_task(mut self, task: Arc<dyn Task<A>>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_policies(mut self, retry: RetryPolicy, gas: GasPolicy) -> Self {
        self.retry_policy = retry;
        self.gas_policy = gas;
        self
    }

    pub fn with_delays(mut self, delays: DelaySettings) -> Self {
        self.delays = delays;
        self
    }

    pub fn with_run_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Runs all loops. A failing task is logged and counted, never fatal.
    /// Cancellation stops at the next task boundary or during a pause and
    /// returns the stats collected so far.
    pub async fn run(&self, actors: &[A], token: CancellationToken) -> RunStats {
        let mut stats = RunStats::default();
        let start_time = Instant::now();
        let loops = self.settings.loop_count;

        info!(
            "Starting execution: {} modules for {} wallet(s) ({} loop(s))",
            self.tasks.len(),
            actors.len(),
            loops
        );

        'outer: for loop_idx in 0..loops {
            info!("Loop {} of {}", loop_idx + 1, loops);

            let wallet_order = Self::visit_order(actors.len(), self.settings.wallet_order);
            for (wallet_pos, &actor_idx) in wallet_order.iter().enumerate() {
                let actor = &actors[actor_idx];
                let actor_id = actor.actor_id();
                let span = tracing::info_span!("wallet", id = %truncate_actor(&actor_id));
                let order = Self::visit_order(self.tasks.len(), self.settings.module_order);

                for (pos, &task_idx) in order.iter().enumerate() {
                    if token.is_cancelled() {
                        break 'outer;
                    }

                    let task = &self.tasks[task_idx];
                    let ctx = self.context_for(&actor_id, task.name());
                    match task.run(actor, &ctx).instrument(span.clone()).await {
                        Ok(result) if result.success => stats.success += 1,
                        Ok(result) => {
                            stats.failed += 1;
                            self.logger.log_error(
                                &actor_id,
                                task.name(),
                                "Run",
                                result.tx_hash.as_deref(),
                                Some(&result.message),
                            );
                        }
                        Err(e) => {
                            stats.failed += 1;
                            self.logger.log_error(
                                &actor_id,
                                task.name(),
                                "Run",
                                None,
                                Some(&error_message(&e)),
                            );
                        }
                    }

                    if pos + 1 < order.len()
                        && !self.pause(self.delays.between_modules, &token).await
                    {
                        break 'outer;
                    }
                }

                if wallet_pos + 1 < wallet_order.len()
                    && !self.pause(self.delays.between_wallets, &token).await
                {
                    break 'outer;
                }
            }

            if loop_idx + 1 < loops && !self.pause(self.delays.between_loops, &token).await {
                break;
            }
        }

        info!(
            "Total Time: {:.1}s | Total Success: {} | Total Fail: {} | Success Rate: {:.2}%",
            start_time.elapsed().as_secs_f64(),
            stats.success,
            stats.failed,
            stats.success_rate()
        );
        stats
    }

    fn visit_order(len: usize, ordering: ModuleOrder) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        if ordering == ModuleOrder::Random {
            order.shuffle(&mut rand::thread_rng());
        }
        order
    }

    fn context_for(&self, actor_id: &str, module: &str) -> TaskContext {
        TaskContext {
            actor_id: actor_id.to_string(),
            module: module.to_string(),
            logger: self.logger.clone(),
            backoff: BackoffExecutor::new(self.retry_policy)
                .with_logger(self.logger.clone())
                .with_sleeper(self.sleeper.clone()),
            gas: GasEscalationExecutor::new(self.gas_policy)
                .with_logger(self.logger.clone())
                .with_sleeper(self.sleeper.clone()),
        }
    }

    /// Returns `false` when cancelled while waiting.
    async fn pause(&self, range: DelayRange, token: &CancellationToken) -> bool {
        let delay = range.sample();
        debug!("Waiting {}ms", delay.as_millis());
        tokio::select! {
            _ = token.cancelled() => {
                info!("🛑 Cancellation received. Stopping run.");
                false
            }
            _ = self.sleeper.sleep(delay) => true,
        }
    }
}
