mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::RecordingSleeper;
use farm_core::{
    Actor, DelayRange, DelaySettings, FarmRunner, GasPolicy, LogLevel, ModuleOrder, RetryPolicy,
    RunSettings, Task, TaskContext, TaskResult, TransactionLogger,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Wallet(String);

impl Actor for Wallet {
    fn actor_id(&self) -> String {
        self.0.clone()
    }
}

/// Records (actor, task) pairs in call order.
struct RecordingTask {
    name: String,
    calls: Calls,
    fail: bool,
}

#[async_trait]
impl Task<Wallet> for RecordingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, actor: &Wallet, ctx: &TaskContext) -> Result<TaskResult> {
        self.calls
            .lock()
            .unwrap()
            .push((actor.actor_id(), self.name.clone()));
        assert_eq!(ctx.module, self.name);
        if self.fail {
            anyhow::bail!("invalid argument");
        }
        Ok(TaskResult::ok("done", Some("0xabc".to_string())))
    }
}

/// Swap that needs one transient retry and one gas bump.
struct FlakySwap {
    attempts: Arc<Mutex<Vec<f64>>>,
}

#[async_trait]
impl Task<Wallet> for FlakySwap {
    fn name(&self) -> &str {
        "Uniswap"
    }

    async fn run(&self, _actor: &Wallet, ctx: &TaskContext) -> Result<TaskResult> {
        let log_ctx = ctx.log_context("Swap");
        let attempts = self.attempts.clone();
        let gas = ctx.gas.clone();

        let hash: String = ctx
            .backoff
            .run(Some(&log_ctx), || {
                let (gas, log_ctx, attempts) = (gas.clone(), log_ctx.clone(), attempts.clone());
                async move {
                    gas.run(&log_ctx, |multiplier| {
                        let attempts = attempts.clone();
                        async move {
                            let n = {
                                let mut a = attempts.lock().unwrap();
                                a.push(multiplier);
                                a.len()
                            };
                            match n {
                                1 => Err(anyhow::anyhow!("transaction underpriced")),
                                2 => Err(anyhow::anyhow!("socket hang up: ECONNRESET")),
                                _ => Ok("0xswap".to_string()),
                            }
                        }
                    })
                    .await
                }
            })
            .await?;

        Ok(TaskResult::ok("swapped", Some(hash)))
    }
}

type Calls = Arc<Mutex<Vec<(String, String)>>>;

fn recording(name: &str, calls: &Calls, fail: bool) -> Arc<dyn Task<Wallet>> {
    Arc::new(RecordingTask {
        name: name.to_string(),
        calls: calls.clone(),
        fail,
    })
}

fn wallets(n: usize) -> Vec<Wallet> {
    (0..n).map(|i| Wallet(format!("0x{:040x}", i + 1))).collect()
}

fn delays() -> DelaySettings {
    DelaySettings {
        between_modules: DelayRange::new(10, 10),
        between_wallets: DelayRange::new(20, 20),
        between_loops: DelayRange::new(30, 30),
    }
}

#[tokio::test]
async fn test_runs_every_task_for_every_wallet_per_loop() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sleeper = RecordingSleeper::new();
    let logger = Arc::new(TransactionLogger::in_memory());

    let runner = FarmRunner::new(logger)
        .with_task(recording("Magma", &calls, false))
        .with_task(recording("Kitsu", &calls, false))
        .with_delays(delays())
        .with_run_settings(RunSettings {
            loop_count: 2,
            module_order: ModuleOrder::Sequential,
            wallet_order: ModuleOrder::Sequential,
        })
        .with_sleeper(sleeper.clone());

    let stats = runner.run(&wallets(2), CancellationToken::new()).await;

    assert_eq!(stats.success, 8);
    assert_eq!(stats.failed, 0);

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 8);
    assert_eq!(calls[0].1, "Magma");
    assert_eq!(calls[1].1, "Kitsu");
    assert_eq!(calls[2].0, format!("0x{:040x}", 2));

    // per loop: module pause per wallet, one wallet pause; one loop pause overall
    let ms: Vec<u128> = sleeper.delays().iter().map(Duration::as_millis).collect();
    assert_eq!(ms, vec![10, 20, 10, 30, 10, 20, 10]);
}

#[tokio::test]
async fn test_failing_task_is_logged_and_run_continues() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let logger = Arc::new(TransactionLogger::in_memory());

    let runner = FarmRunner::new(logger.clone())
        .with_task(recording("Bebop", &calls, true))
        .with_task(recording("Izumi", &calls, false))
        .with_delays(DelaySettings::none())
        .with_sleeper(RecordingSleeper::new());

    let stats = runner.run(&wallets(1), CancellationToken::new()).await;

    assert_eq!(stats.success, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(calls.lock().unwrap().len(), 2);

    let errors = logger.module_history("Bebop");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].status, LogLevel::Error);
    assert_eq!(errors[0].details.as_deref(), Some("invalid argument"));
}

#[tokio::test]
async fn test_random_order_runs_each_task_once() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut runner = FarmRunner::new(Arc::new(TransactionLogger::in_memory()))
        .with_delays(DelaySettings::none())
        .with_run_settings(RunSettings {
            loop_count: 1,
            module_order: ModuleOrder::Random,
            ..RunSettings::default()
        })
        .with_sleeper(RecordingSleeper::new());
    for name in ["A", "B", "C", "D"] {
        runner = runner.with_task(recording(name, &calls, false));
    }

    runner.run(&wallets(1), CancellationToken::new()).await;

    let mut names: Vec<String> = calls.lock().unwrap().iter().map(|c| c.1.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["A", "B", "C", "D"]);
}

#[tokio::test]
async fn test_random_wallet_order_runs_each_wallet_once_per_loop() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sleeper = RecordingSleeper::new();
    let runner = FarmRunner::new(Arc::new(TransactionLogger::in_memory()))
        .with_task(recording("Magma", &calls, false))
        .with_task(recording("Kitsu", &calls, false))
        .with_delays(delays())
        .with_run_settings(RunSettings {
            loop_count: 3,
            module_order: ModuleOrder::Sequential,
            wallet_order: ModuleOrder::Random,
        })
        .with_sleeper(sleeper.clone());

    let actors = wallets(5);
    let stats = runner.run(&actors, CancellationToken::new()).await;
    assert_eq!(stats.success, 30);

    let calls = calls.lock().unwrap().clone();
    let mut expected: Vec<String> = actors.iter().map(Actor::actor_id).collect();
    expected.sort();
    for loop_calls in calls.chunks(10) {
        // tasks of one wallet stay together and in module order
        for pair in loop_calls.chunks(2) {
            assert_eq!(pair[0].0, pair[1].0);
            assert_eq!((pair[0].1.as_str(), pair[1].1.as_str()), ("Magma", "Kitsu"));
        }
        let mut seen: Vec<String> = loop_calls.iter().step_by(2).map(|c| c.0.clone()).collect();
        seen.sort();
        assert_eq!(seen, expected);
    }

    // 4 wallet pauses per loop, still never after the last wallet
    let ms: Vec<u128> = sleeper.delays().iter().map(Duration::as_millis).collect();
    assert_eq!(ms.iter().filter(|&&d| d == 20).count(), 12);
    assert_eq!(ms.iter().filter(|&&d| d == 30).count(), 2);
}

#[tokio::test]
async fn test_cancelled_token_stops_before_first_task() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let runner = FarmRunner::new(Arc::new(TransactionLogger::in_memory()))
        .with_task(recording("Magma", &calls, false))
        .with_sleeper(RecordingSleeper::new());

    let token = CancellationToken::new();
    token.cancel();
    let stats = runner.run(&wallets(3), token).await;

    assert_eq!(stats.total(), 0);
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_during_pause() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    // real timer with a long pause so cancellation wins the race
    let runner = FarmRunner::new(Arc::new(TransactionLogger::in_memory()))
        .with_task(recording("Magma", &calls, false))
        .with_delays(DelaySettings {
            between_wallets: DelayRange::new(60_000, 60_000),
            ..DelaySettings::none()
        });

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let stats = tokio::time::timeout(Duration::from_secs(5), runner.run(&wallets(2), token))
        .await
        .expect("runner should stop on cancellation");

    assert_eq!(stats.success, 1);
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_tasks_use_context_executors() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let logger = Arc::new(TransactionLogger::in_memory());
    let sleeper = RecordingSleeper::new();

    let runner = FarmRunner::<Wallet>::new(logger.clone())
        .with_task(Arc::new(FlakySwap {
            attempts: attempts.clone(),
        }))
        .with_policies(RetryPolicy::new(3, 100), GasPolicy::default())
        .with_delays(DelaySettings::none())
        .with_sleeper(sleeper.clone());

    let stats = runner.run(&wallets(1), CancellationToken::new()).await;
    assert_eq!(stats.success, 1);

    let attempts = attempts.lock().unwrap().clone();
    assert_eq!(attempts.len(), 3);
    assert!((attempts[1] - 1.55).abs() < 1e-9);
    assert!((attempts[2] - 1.1).abs() < 1e-9);

    let successes: Vec<_> = logger
        .history()
        .into_iter()
        .filter(|e| e.status == LogLevel::Success)
        .collect();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].tx_ref.as_deref(), Some("0xswap"));
    assert_eq!(successes[0].module, "Uniswap");

    // gas wait, then the jittered backoff wait
    let delays = sleeper.delays();
    assert_eq!(delays[0], Duration::from_millis(2000));
    assert!(delays[1] >= Duration::from_millis(85) && delays[1] <= Duration::from_millis(115));
}
