// Latchkey server - hosts the lease lock and drives scheduled flash-sale rounds against it

pub mod config; // Configuration management
pub mod job; // Flash sale trials and rounds
pub mod metrics; // Metric descriptions and helpers
pub mod pool; // Bounded worker pool with caller-runs overflow
pub mod scheduler; // Round trigger
pub mod startup; // Logging, shutdown and store wiring

pub use config::{Cli, Configuration, StoreKind};
pub use job::{FlashSaleConfig, FlashSaleJob, RoundReport, TrialOutcome};
pub use pool::{PoolConfig, Submission, WorkerPool};
pub use scheduler::{ScheduleConfig, Scheduler};
