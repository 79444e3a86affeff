//! Entry point for the Latchkey server.
//!
//! Loads configuration, connects the lease store and runs flash sale rounds
//! until the schedule completes or the process is asked to stop.

use std::sync::Arc;

use latchkey_core::LeaseLock;
use latchkey_server::{
    Configuration, FlashSaleJob, Scheduler, WorkerPool, metrics,
    startup::{self, connect_store},
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;

    let _logging_guard = startup::init_logging(&configuration.logging_config()?)?;
    metrics::init_metrics();

    let options = configuration.lock_options()?;
    info!(
        lease_duration_ms = options.lease_duration_ms,
        wait_budget_ms = options.wait_budget_ms,
        backoff_min_ms = options.backoff.min_ms,
        backoff_max_ms = options.backoff.max_ms,
        "Lock options loaded"
    );

    let store = connect_store(&configuration).await?;
    let lock = LeaseLock::new(store, options)?;

    let shutdown = startup::wait_for_shutdown_signal();

    let pool_config = configuration.pool_config();
    let pool = Arc::new(WorkerPool::new(pool_config)?);
    info!(
        core_size = pool_config.core_size,
        max_size = pool_config.max_size,
        queue_capacity = pool_config.queue_capacity,
        "Worker pool ready"
    );

    let job = FlashSaleJob::new(
        lock.clone(),
        pool,
        configuration.job_config(),
        shutdown.cancel_signal(),
    );
    let reports = Scheduler::new(configuration.schedule_config())
        .run(&job, &shutdown)
        .await;

    let stats = lock.stats();
    info!(
        rounds = reports.len(),
        acquisitions = stats.total_acquisitions,
        steals = stats.steals,
        timeouts = stats.timeouts,
        cancellations = stats.cancellations,
        store_errors = stats.store_errors,
        "Latchkey server stopped"
    );
    info!(reports = %serde_json::to_string(&reports)?, "Round reports");

    Ok(())
}
