// Metric descriptions and recording helpers for the lock service
// Lock protocol counters are emitted by latchkey-core; trial and round metrics live here

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::job::TrialOutcome;
use crate::pool::Submission;

/// Describe every metric the process emits. Call once at startup.
pub fn init_metrics() {
    // Lease protocol
    describe_counter!(
        "latchkey_acquire_total",
        "Leases granted, labelled by fresh or stolen path"
    );
    describe_counter!(
        "latchkey_acquire_timeout_total",
        "Acquisitions that spent their wait budget"
    );
    describe_counter!(
        "latchkey_release_total",
        "Release calls, labelled by outcome"
    );

    // Flash sale job
    describe_counter!("latchkey_trials_total", "Trials run, labelled by outcome");
    describe_histogram!(
        "latchkey_round_duration_seconds",
        "Wall time of one round of trials"
    );

    // Worker pool
    describe_counter!(
        "latchkey_pool_submissions_total",
        "Tasks handed to the worker pool, labelled by how they were admitted"
    );
    describe_gauge!("latchkey_pool_queued", "Tasks waiting for a core worker");

    tracing::info!("Metrics initialized");
}

pub fn record_trial(outcome: TrialOutcome) {
    counter!("latchkey_trials_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_round(duration_secs: f64) {
    histogram!("latchkey_round_duration_seconds").record(duration_secs);
}

pub fn record_submission(submission: Submission) {
    counter!("latchkey_pool_submissions_total", "mode" => submission.as_str()).increment(1);
}

pub fn set_pool_queued(queued: usize) {
    gauge!("latchkey_pool_queued").set(queued as f64);
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
