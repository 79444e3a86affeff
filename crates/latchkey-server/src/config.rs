//! Configuration management for the Latchkey server
//!
//! Sources, lowest precedence first: `conf/application.yml`, environment
//! variables named after the keys (`latchkey.lock.wait-budget-ms`), then
//! command line flags.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use config::{Config, Environment, File};
use latchkey_common::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_MIN_MS, DEFAULT_LEASE_DURATION_MS,
    DEFAULT_WAIT_BUDGET_MS,
};
use latchkey_core::{BackoffRange, CorruptLeasePolicy, LockOptions};

use crate::job::FlashSaleConfig;
use crate::pool::PoolConfig;
use crate::scheduler::ScheduleConfig;
use crate::startup::{LogRotation, LoggingConfig};

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

pub const LOCK_LEASE_DURATION_MS: &str = "latchkey.lock.lease-duration-ms";
pub const LOCK_WAIT_BUDGET_MS: &str = "latchkey.lock.wait-budget-ms";
pub const LOCK_BACKOFF_MIN_MS: &str = "latchkey.lock.backoff-min-ms";
pub const LOCK_BACKOFF_MAX_MS: &str = "latchkey.lock.backoff-max-ms";
pub const LOCK_CORRUPT_POLICY: &str = "latchkey.lock.corrupt-policy";
pub const LOCK_PREFER_ATOMIC: &str = "latchkey.lock.prefer-atomic";
pub const STORE_TYPE: &str = "latchkey.store.type";
pub const STORE_REDIS_URL: &str = "latchkey.store.redis-url";
pub const POOL_CORE_SIZE: &str = "latchkey.pool.core-size";
pub const POOL_MAX_SIZE: &str = "latchkey.pool.max-size";
pub const POOL_QUEUE_CAPACITY: &str = "latchkey.pool.queue-capacity";
pub const SCHEDULE_INTERVAL_SECS: &str = "latchkey.schedule.interval-secs";
pub const SCHEDULE_ROUNDS: &str = "latchkey.schedule.rounds";
pub const JOB_RESOURCE: &str = "latchkey.job.resource";
pub const JOB_TRIALS: &str = "latchkey.job.trials";
pub const JOB_HOLD_MS: &str = "latchkey.job.hold-ms";
pub const LOGS_PATH: &str = "latchkey.logs.path";
pub const LOGS_LEVEL: &str = "latchkey.logs.level";
pub const LOGS_CONSOLE: &str = "latchkey.logs.console";
pub const LOGS_FILE: &str = "latchkey.logs.file";
pub const LOGS_ROTATION: &str = "latchkey.logs.rotation";

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "latchkey-server", version, about)]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: String,
    /// Lease store: memory or redis
    #[arg(short = 's', long = "store")]
    pub store: Option<String>,
    #[arg(long = "redis-url", env = "LATCHKEY_REDIS_URL")]
    pub redis_url: Option<String>,
    /// Core worker count of the dispatch pool
    #[arg(short = 'w', long = "workers")]
    pub workers: Option<usize>,
    /// Number of rounds to run; 0 runs until shutdown
    #[arg(short = 'r', long = "rounds")]
    pub rounds: Option<u64>,
    /// Trials per round
    #[arg(short = 'n', long = "trials")]
    pub trials: Option<u64>,
    /// Resource the trials contend on
    #[arg(long = "resource")]
    pub resource: Option<String>,
}

/// Which store adapter to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Redis { url: String },
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration using the process command line
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(args: Cli) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name(&args.config_file).required(false))
            .add_source(
                Environment::with_prefix("latchkey")
                    .separator(".")
                    .keep_prefix(true)
                    .try_parsing(true),
            );

        if let Some(v) = args.store {
            builder = builder.set_override(STORE_TYPE, v)?;
        }
        if let Some(v) = args.redis_url {
            builder = builder.set_override(STORE_REDIS_URL, v)?;
        }
        if let Some(v) = args.workers {
            builder = builder.set_override(POOL_CORE_SIZE, v as i64)?;
        }
        if let Some(v) = args.rounds {
            builder = builder.set_override(SCHEDULE_ROUNDS, v as i64)?;
        }
        if let Some(v) = args.trials {
            builder = builder.set_override(JOB_TRIALS, v as i64)?;
        }
        if let Some(v) = args.resource {
            builder = builder.set_override(JOB_RESOURCE, v)?;
        }

        let config = builder
            .build()
            .with_context(|| format!("failed to load configuration from {}", args.config_file))?;

        Ok(Configuration { config })
    }

    // ========================================================================
    // Lock Configuration
    // ========================================================================

    pub fn lease_duration_ms(&self) -> i64 {
        self.config
            .get_int(LOCK_LEASE_DURATION_MS)
            .unwrap_or(DEFAULT_LEASE_DURATION_MS)
    }

    pub fn wait_budget_ms(&self) -> i64 {
        self.config
            .get_int(LOCK_WAIT_BUDGET_MS)
            .unwrap_or(DEFAULT_WAIT_BUDGET_MS)
    }

    pub fn backoff_range(&self) -> anyhow::Result<BackoffRange> {
        let min_ms = self
            .config
            .get_int(LOCK_BACKOFF_MIN_MS)
            .unwrap_or(DEFAULT_BACKOFF_MIN_MS as i64);
        let max_ms = self
            .config
            .get_int(LOCK_BACKOFF_MAX_MS)
            .unwrap_or(DEFAULT_BACKOFF_MAX_MS as i64);
        anyhow::ensure!(
            min_ms >= 0 && max_ms >= 0,
            "backoff bounds must not be negative: [{min_ms}, {max_ms}]"
        );
        Ok(BackoffRange::new(min_ms as u64, max_ms as u64)?)
    }

    pub fn corrupt_policy(&self) -> anyhow::Result<CorruptLeasePolicy> {
        match self.config.get_string(LOCK_CORRUPT_POLICY) {
            Ok(v) => Ok(v.parse()?),
            Err(_) => Ok(CorruptLeasePolicy::default()),
        }
    }

    pub fn prefer_atomic(&self) -> bool {
        self.config.get_bool(LOCK_PREFER_ATOMIC).unwrap_or(true)
    }

    pub fn lock_options(&self) -> anyhow::Result<LockOptions> {
        let options = LockOptions {
            lease_duration_ms: self.lease_duration_ms(),
            wait_budget_ms: self.wait_budget_ms(),
            backoff: self.backoff_range()?,
            corrupt_policy: self.corrupt_policy()?,
            prefer_atomic: self.prefer_atomic(),
            ..Default::default()
        };
        options.validate()?;
        Ok(options)
    }

    // ========================================================================
    // Store Configuration
    // ========================================================================

    pub fn store_kind(&self) -> anyhow::Result<StoreKind> {
        let kind = self
            .config
            .get_string(STORE_TYPE)
            .unwrap_or_else(|_| "memory".to_string());
        match kind.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "redis" => Ok(StoreKind::Redis {
                url: self
                    .config
                    .get_string(STORE_REDIS_URL)
                    .unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            }),
            other => anyhow::bail!("unknown store type: {other}"),
        }
    }

    // ========================================================================
    // Pool / Schedule / Job Configuration
    // ========================================================================

    pub fn pool_config(&self) -> PoolConfig {
        let defaults = PoolConfig::default();
        PoolConfig {
            core_size: self.get_usize(POOL_CORE_SIZE, defaults.core_size),
            max_size: self.get_usize(POOL_MAX_SIZE, defaults.max_size),
            queue_capacity: self.get_usize(POOL_QUEUE_CAPACITY, defaults.queue_capacity),
        }
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        let interval_secs = self.config.get_int(SCHEDULE_INTERVAL_SECS).unwrap_or(0);
        let rounds = self.config.get_int(SCHEDULE_ROUNDS).unwrap_or(1);
        ScheduleConfig {
            interval: Duration::from_secs(interval_secs.max(0) as u64),
            rounds: (rounds > 0).then_some(rounds as u64),
        }
    }

    pub fn job_config(&self) -> FlashSaleConfig {
        let defaults = FlashSaleConfig::default();
        FlashSaleConfig {
            resource: self
                .config
                .get_string(JOB_RESOURCE)
                .unwrap_or(defaults.resource),
            trials: self
                .config
                .get_int(JOB_TRIALS)
                .map(|v| v.max(0) as u64)
                .unwrap_or(defaults.trials),
            hold: self
                .config
                .get_int(JOB_HOLD_MS)
                .map(|v| Duration::from_millis(v.max(0) as u64))
                .unwrap_or(defaults.hold),
        }
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn log_rotation(&self) -> anyhow::Result<LogRotation> {
        match self.config.get_string(LOGS_ROTATION) {
            Ok(v) => v.parse(),
            Err(_) => Ok(LogRotation::Daily),
        }
    }

    pub fn logging_config(&self) -> anyhow::Result<LoggingConfig> {
        Ok(LoggingConfig::from_config(
            self.config.get_string(LOGS_PATH).ok(),
            self.config.get_bool(LOGS_CONSOLE).unwrap_or(true),
            self.config.get_bool(LOGS_FILE).unwrap_or(true),
            self.config
                .get_string(LOGS_LEVEL)
                .unwrap_or_else(|_| "info".to_string()),
            self.log_rotation()?,
        ))
    }

    fn get_usize(&self, key: &str, default: usize) -> usize {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(default)
    }
}
