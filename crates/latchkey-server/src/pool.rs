//! Bounded worker pool that dispatches lock trials
//!
//! Admission follows the classic thread-pool order: a free core worker runs
//! the task at once, otherwise it waits in a bounded queue, otherwise an
//! overflow worker (up to `max_size`) takes it. When all of those are full
//! the submitting task runs it itself.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::metrics;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_size: 10,
            max_size: 100,
            queue_capacity: 65_535,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.core_size == 0 {
            return Err(PoolError::InvalidConfig(
                "core-size must be at least 1".to_string(),
            ));
        }
        if self.max_size < self.core_size {
            return Err(PoolError::InvalidConfig(format!(
                "max-size {} is below core-size {}",
                self.max_size, self.core_size
            )));
        }
        Ok(())
    }
}

/// How a submitted task was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A core worker picked it up immediately
    Running,
    /// Waiting for a core worker
    Queued,
    /// Core workers and queue were full; an overflow worker took it
    Overflow,
    /// Everything was saturated; the submitter ran it before returning
    CallerRan,
}

impl Submission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Queued => "queued",
            Self::Overflow => "overflow",
            Self::CallerRan => "caller_ran",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
}

pub struct WorkerPool {
    config: PoolConfig,
    core: Arc<Semaphore>,
    overflow: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
    tasks: Mutex<JoinSet<()>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            config,
            core: Arc::new(Semaphore::new(config.core_size)),
            overflow: Arc::new(Semaphore::new(config.max_size - config.core_size)),
            queued: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
            tasks: Mutex::new(JoinSet::new()),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        let overflow_capacity = self.config.max_size - self.config.core_size;
        PoolStats {
            active: (self.config.core_size - self.core.available_permits())
                + (overflow_capacity - self.overflow.available_permits()),
            queued: self.queued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }

    /// Hand a task to the pool. Only a [`Submission::CallerRan`] task has
    /// finished by the time this returns.
    pub async fn submit<F>(&self, task: F) -> Submission
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let submission = self.admit(task).await;
        metrics::record_submission(submission);
        submission
    }

    async fn admit<F>(&self, task: F) -> Submission
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let completed = self.completed.clone();

        if let Ok(permit) = self.core.clone().try_acquire_owned() {
            self.tasks.lock().spawn(async move {
                task.await;
                drop(permit);
                completed.fetch_add(1, Ordering::Relaxed);
            });
            return Submission::Running;
        }

        if self.try_enqueue() {
            let core = self.core.clone();
            let queued = self.queued.clone();
            self.tasks.lock().spawn(async move {
                let permit = core.acquire_owned().await;
                metrics::set_pool_queued(queued.fetch_sub(1, Ordering::AcqRel) - 1);
                match permit {
                    Ok(_permit) => {
                        task.await;
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => warn!("Worker pool closed while a task was queued"),
                }
            });
            return Submission::Queued;
        }

        if let Ok(permit) = self.overflow.clone().try_acquire_owned() {
            debug!(
                max_size = self.config.max_size,
                "Core workers and queue full, using overflow worker"
            );
            self.tasks.lock().spawn(async move {
                task.await;
                drop(permit);
                completed.fetch_add(1, Ordering::Relaxed);
            });
            return Submission::Overflow;
        }

        warn!(
            max_size = self.config.max_size,
            queue_capacity = self.config.queue_capacity,
            "Worker pool saturated, running task on the caller"
        );
        task.await;
        completed.fetch_add(1, Ordering::Relaxed);
        Submission::CallerRan
    }

    fn try_enqueue(&self) -> bool {
        let result = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < self.config.queue_capacity).then_some(queued + 1)
            });
        match result {
            Ok(previous) => {
                metrics::set_pool_queued(previous + 1);
                true
            }
            Err(_) => false,
        }
    }

    /// Wait for every task submitted so far. Returns how many of them panicked.
    pub async fn join_all(&self) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut panicked = 0;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Worker task failed");
                panicked += 1;
            }
        }
        panicked
    }
}
