mod common;

use common::WALLET;
use farm_core::{LogLevel, TransactionLogger, TxLog};
use std::fs;

#[test]
fn test_file_sink_appends_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transaction-logs.txt");
    let logger = TransactionLogger::with_file(&path);

    logger.log_info(WALLET, "Kitsu", "Starting Stake", None, None);
    logger.log_success(WALLET, "Kitsu", "Stake", Some("0xabc"), Some("done"));

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("[Kitsu] [INFO] Wallet 0x1234...5678 performed Starting Stake"));
    assert!(lines[1].ends_with(
        "[Kitsu] [SUCCESS] Wallet 0x1234...5678 performed Stake - TX: 0xabc - Details: done"
    ));
}

#[test]
fn test_concurrent_writes_keep_file_and_history_in_same_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transaction-logs.txt");
    let logger = TransactionLogger::with_file(&path);

    std::thread::scope(|s| {
        for worker in 0..8 {
            let logger = &logger;
            s.spawn(move || {
                for i in 0..25 {
                    let details = format!("worker {worker} entry {i}");
                    logger.log_info(WALLET, "Kitsu", "Stake", None, Some(&details));
                }
            });
        }
    });

    let content = fs::read_to_string(&path).unwrap();
    let file_lines: Vec<&str> = content.lines().collect();
    let history_lines: Vec<String> = logger.history().iter().map(|e| e.to_line()).collect();
    assert_eq!(file_lines.len(), 200);
    assert_eq!(file_lines, history_lines);
}

#[test]
fn test_unwritable_sink_does_not_fail() {
    let dir = tempfile::tempdir().unwrap();
    // a directory cannot be opened for appending
    let logger = TransactionLogger::with_file(dir.path());

    let entry = logger.log_error(WALLET, "Bebop", "Wrap", None, Some("boom"));
    assert_eq!(entry.status, LogLevel::Error);
    assert_eq!(logger.history().len(), 1);
}

#[test]
fn test_csv_export() {
    let dir = tempfile::tempdir().unwrap();
    let logger = TransactionLogger::in_memory();
    logger.log_success(WALLET, "Rubic", "Swap", Some("0x1"), Some("a, b, c"));
    logger.log_warning(WALLET, "Rubic", "Swap", None, None);

    let out = logger.export_csv(dir.path().join("history.csv")).unwrap();
    let content = fs::read_to_string(out).unwrap();
    let lines: Vec<&str> = content.lines().collect();

    assert_eq!(lines[0], "Timestamp,Wallet,Module,Action,Status,TxHash,Details");
    assert!(lines[1].ends_with(&format!("{},Rubic,Swap,SUCCESS,0x1,a; b; c", WALLET)));
    assert!(lines[2].ends_with(&format!("{},Rubic,Swap,WARNING,,", WALLET)));
}

#[test]
fn test_csv_export_bad_path() {
    let logger = TransactionLogger::in_memory();
    let err = logger
        .export_csv("/nonexistent-dir/for/sure/history.csv")
        .unwrap_err();
    assert!(err.to_string().contains("history.csv"));
}

#[test]
fn test_summary_json() {
    let logger = TransactionLogger::in_memory();
    logger.log_success(WALLET, "Izumi", "Swap", Some("0x1"), None);
    logger.log_success(WALLET, "Izumi", "Swap", Some("0x2"), None);
    logger.log_error(WALLET, "Izumi", "Swap", None, Some("reverted"));
    logger.log_info(WALLET, "Izumi", "Swap", None, None);

    let summary = logger.summary();
    assert_eq!(summary.total_entries, 4);
    assert_eq!(summary.wallets_used, 1);
    assert_eq!(summary.start_time, Some(logger.history()[0].timestamp.clone()));

    let stats = &summary.module_stats["Izumi"];
    assert_eq!((stats.total, stats.success, stats.error), (4, 2, 1));
    assert_eq!(stats.success_rate, Some(50.0));

    let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
    assert_eq!(json["module_stats"]["Izumi"]["success"], 2);
}

#[test]
fn test_entry_serializes_status_uppercase() {
    let logger = TransactionLogger::in_memory();
    let entry = logger.log_warning(WALLET, "Mono", "Send", None, Some("slow"));
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["status"], "WARNING");
    assert_eq!(json["actor_short"], "0x1234...5678");
    assert_eq!(json["actor_id"], WALLET);
}
