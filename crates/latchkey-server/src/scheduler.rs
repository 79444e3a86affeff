//! Fixed-interval trigger for flash sale rounds

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::job::{FlashSaleJob, RoundReport};
use crate::startup::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Gap between round starts. Zero runs rounds back to back.
    pub interval: Duration,
    /// `None` keeps going until shutdown
    pub rounds: Option<u64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            rounds: Some(1),
        }
    }
}

pub struct Scheduler {
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self { config }
    }

    /// Run rounds until the configured count is reached or shutdown fires.
    /// A round already in progress finishes before the scheduler returns.
    pub async fn run(&self, job: &FlashSaleJob, shutdown: &ShutdownSignal) -> Vec<RoundReport> {
        let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut reports = Vec::new();
        let mut round = 0;
        loop {
            if let Some(limit) = self.config.rounds
                && round >= limit
            {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {}
            }

            round += 1;
            info!(
                round,
                started_at = %chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                resource = %job.config().resource,
                trials = job.config().trials,
                "Starting flash sale round"
            );
            reports.push(job.run_round(round).await);
        }

        info!(rounds = reports.len(), "Scheduler stopped");
        reports
    }
}
