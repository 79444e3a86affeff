//! Retry backoff: jitter sampling and delay
//!
//! Between attempts the acquisition loop sleeps for a random duration drawn
//! uniformly from a [`BackoffRange`]. Both the random source and the sleep are
//! injected so tests can replay a seed and observe sleeps without waiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use latchkey_common::{DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_MIN_MS, ManualClock};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{LockError, Result};

/// Inclusive bounds for the retry sleep, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl BackoffRange {
    pub fn new(min_ms: u64, max_ms: u64) -> Result<Self> {
        let range = Self { min_ms, max_ms };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_ms > self.max_ms {
            return Err(LockError::InvalidOptions(format!(
                "backoff range is inverted: [{}, {}]",
                self.min_ms, self.max_ms
            )));
        }
        // A zero-only range would retry without ever sleeping
        if self.max_ms == 0 {
            return Err(LockError::InvalidOptions(
                "backoff upper bound must be at least 1ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn contains(&self, millis: u64) -> bool {
        (self.min_ms..=self.max_ms).contains(&millis)
    }
}

impl Default for BackoffRange {
    fn default() -> Self {
        Self {
            min_ms: DEFAULT_BACKOFF_MIN_MS,
            max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

/// Source of retry jitter
pub trait JitterSource: Send + Sync {
    /// Draw a sleep duration in `[range.min_ms, range.max_ms]`
    fn sample_ms(&self, range: BackoffRange) -> u64;
}

/// Uniform jitter from a seedable PRNG
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    /// Deterministic sequence for a given seed
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }
}

impl Default for SeededJitter {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl JitterSource for SeededJitter {
    fn sample_ms(&self, range: BackoffRange) -> u64 {
        if range.min_ms >= range.max_ms {
            return range.min_ms;
        }
        self.rng.lock().random_range(range.min_ms..=range.max_ms)
    }
}

/// Always returns the same value, clamped into the requested range
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub u64);

impl JitterSource for FixedJitter {
    fn sample_ms(&self, range: BackoffRange) -> u64 {
        self.0.clamp(range.min_ms, range.max_ms.max(range.min_ms))
    }
}

/// Async sleep used between attempts
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested sleeps instead of waiting
///
/// When built with [`RecordingDelay::advancing`], each sleep moves the manual
/// clock forward by the slept duration, so stored leases age as they would
/// under real time.
#[derive(Default)]
pub struct RecordingDelay {
    clock: Option<Arc<ManualClock>>,
    slept: Mutex<Vec<Duration>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advancing(clock: Arc<ManualClock>) -> Self {
        Self {
            clock: Some(clock),
            slept: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.slept.lock().len()
    }

    pub fn total(&self) -> Duration {
        self.slept.lock().iter().sum()
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration.as_millis() as i64);
        }
        tokio::task::yield_now().await;
    }
}
