//! Flash sale ("seckill") job
//!
//! Each trial contends for the same resource through the worker pool, holds
//! the lease for `hold`, then releases it. A round runs `trials` of them and
//! waits for all to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use latchkey_core::{AcquireRequest, CancelSignal, LeaseLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::metrics::{self, Timer};
use crate::pool::WorkerPool;

pub const DEFAULT_RESOURCE: &str = "orderno";
pub const DEFAULT_TRIALS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSaleConfig {
    pub resource: String,
    pub trials: u64,
    /// Time spent inside the critical section
    pub hold: Duration,
}

impl Default for FlashSaleConfig {
    fn default() -> Self {
        Self {
            resource: DEFAULT_RESOURCE.to_string(),
            trials: DEFAULT_TRIALS,
            hold: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    Acquired,
    TimedOut,
    Cancelled,
    Failed,
}

impl TrialOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Tally of one round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u64,
    pub trials: u64,
    pub acquired: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub failed: u64,
    /// Trials whose worker panicked
    pub lost: u64,
}

#[derive(Default)]
struct RoundTally {
    acquired: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

impl RoundTally {
    fn record(&self, outcome: TrialOutcome) {
        let counter = match outcome {
            TrialOutcome::Acquired => &self.acquired,
            TrialOutcome::TimedOut => &self.timed_out,
            TrialOutcome::Cancelled => &self.cancelled,
            TrialOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone)]
pub struct FlashSaleJob {
    lock: LeaseLock,
    pool: Arc<WorkerPool>,
    config: Arc<FlashSaleConfig>,
    cancel: CancelSignal,
}

impl FlashSaleJob {
    pub fn new(
        lock: LeaseLock,
        pool: Arc<WorkerPool>,
        config: FlashSaleConfig,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            lock,
            pool,
            config: Arc::new(config),
            cancel,
        }
    }

    pub fn lock(&self) -> &LeaseLock {
        &self.lock
    }

    pub fn config(&self) -> &FlashSaleConfig {
        &self.config
    }

    /// One contender: acquire the resource, hold it, release it
    pub async fn seckill(&self, trial: u64) -> TrialOutcome {
        let request =
            AcquireRequest::new(self.config.resource.as_str()).cancel_signal(self.cancel.clone());
        let hold = self.config.hold;
        let cancel = self.cancel.clone();

        let result = self
            .lock
            .with_lease(request, |grant| async move {
                info!(
                    trial,
                    key = %grant.key,
                    path = grant.path.as_str(),
                    attempts = grant.attempts,
                    "Obtained the lock"
                );
                if !hold.is_zero() {
                    // Shutdown cuts the hold short so the lease is released promptly
                    tokio::select! {
                        _ = tokio::time::sleep(hold) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            })
            .await;

        let outcome = match result {
            Ok(Some(())) => TrialOutcome::Acquired,
            Ok(None) => {
                info!(trial, resource = %self.config.resource, "Did not obtain the lock");
                TrialOutcome::TimedOut
            }
            Err(e) if e.is_cancelled() => {
                debug!(trial, reason = %e, "Trial cancelled");
                TrialOutcome::Cancelled
            }
            Err(e) => {
                warn!(trial, error = %e, "Trial failed");
                TrialOutcome::Failed
            }
        };
        metrics::record_trial(outcome);
        outcome
    }

    /// Dispatch every trial through the pool and wait for all of them
    pub async fn run_round(&self, round: u64) -> RoundReport {
        let timer = Timer::new();
        let tally = Arc::new(RoundTally::default());

        for trial in 0..self.config.trials {
            let job = self.clone();
            let tally = tally.clone();
            self.pool
                .submit(async move {
                    let outcome = job.seckill(trial).await;
                    tally.record(outcome);
                })
                .await;
        }
        let lost = self.pool.join_all().await as u64;

        let report = RoundReport {
            round,
            trials: self.config.trials,
            acquired: tally.acquired.load(Ordering::Relaxed),
            timed_out: tally.timed_out.load(Ordering::Relaxed),
            cancelled: tally.cancelled.load(Ordering::Relaxed),
            failed: tally.failed.load(Ordering::Relaxed),
            lost,
        };
        metrics::record_round(timer.elapsed_secs());
        info!(
            round,
            trials = report.trials,
            acquired = report.acquired,
            timed_out = report.timed_out,
            cancelled = report.cancelled,
            failed = report.failed,
            elapsed_ms = (timer.elapsed_secs() * 1_000.0) as u64,
            "Round finished"
        );
        report
    }
}
