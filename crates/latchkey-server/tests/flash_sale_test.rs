//! End-to-end flash sale rounds wired from a configuration file

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use latchkey_core::LeaseLock;
use latchkey_server::startup::{ShutdownSignal, connect_store};
use latchkey_server::{Cli, Configuration, FlashSaleJob, RoundReport, Scheduler, WorkerPool};

fn configuration(yaml: &str) -> (Configuration, tempfile::NamedTempFile) {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    let path = file.path().to_string_lossy().to_string();
    let cli = Cli::parse_from(["latchkey-server", "--config", &path]);
    (Configuration::from_cli(cli).unwrap(), file)
}

async fn run(
    configuration: &Configuration,
    shutdown: &ShutdownSignal,
) -> (Vec<RoundReport>, LeaseLock) {
    let store = connect_store(configuration).await.unwrap();
    let lock = LeaseLock::new(store, configuration.lock_options().unwrap()).unwrap();
    let pool = Arc::new(WorkerPool::new(configuration.pool_config()).unwrap());
    let job = FlashSaleJob::new(
        lock.clone(),
        pool,
        configuration.job_config(),
        shutdown.cancel_signal(),
    );
    let reports = Scheduler::new(configuration.schedule_config())
        .run(&job, shutdown)
        .await;
    (reports, lock)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scheduled_rounds_on_memory_store() {
    let (configuration, _file) = configuration(
        r#"
latchkey:
  lock:
    backoff-min-ms: 1
    backoff-max-ms: 3
  store:
    type: memory
  pool:
    core-size: 10
    max-size: 100
    queue-capacity: 65535
  schedule:
    rounds: 2
  job:
    resource: orderno
    trials: 50
"#,
    );

    let (reports, lock) = run(&configuration, &ShutdownSignal::new()).await;

    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert_eq!(report.trials, 50);
        assert_eq!(report.acquired, 50, "round {} lost trials", report.round);
        assert_eq!(report.failed + report.cancelled + report.lost, 0);
    }

    let stats = lock.stats();
    assert_eq!(stats.total_acquisitions, 100);
    assert_eq!(stats.total_releases, 100);
    assert_eq!(stats.store_errors, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_budget_round_splits_into_winners_and_losers() {
    let (configuration, _file) = configuration(
        r#"
latchkey:
  lock:
    wait-budget-ms: 0
  pool:
    core-size: 8
    max-size: 8
  job:
    trials: 40
    hold-ms: 20
"#,
    );

    let (reports, _) = run(&configuration, &ShutdownSignal::new()).await;

    let report = &reports[0];
    assert!(report.acquired >= 1);
    assert!(report.timed_out >= 1, "holding for 20ms must turn some trials away");
    assert_eq!(report.acquired + report.timed_out, 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_cancels_waiting_trials() {
    let (configuration, _file) = configuration(
        r#"
latchkey:
  lock:
    wait-budget-ms: 60000
    backoff-min-ms: 5
    backoff-max-ms: 10
  pool:
    core-size: 4
    max-size: 4
  schedule:
    rounds: 0
  job:
    trials: 4
    hold-ms: 60000
"#,
    );
    let shutdown = ShutdownSignal::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.shutdown();
    });

    let (reports, lock) = tokio::time::timeout(Duration::from_secs(5), run(&configuration, &shutdown))
        .await
        .expect("shutdown should end the round well before the hold time");

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.acquired, 1);
    assert_eq!(report.cancelled, 3);
    assert_eq!(lock.stats().cancellations, 3);
}
