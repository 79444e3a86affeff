//! Process startup: logging, shutdown handling and store wiring

mod logging;
mod shutdown;
mod store;

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, ROOT_LOG_FILE, init_logging};
pub use shutdown::{ShutdownSignal, wait_for_shutdown_signal};
pub use store::connect_store;
