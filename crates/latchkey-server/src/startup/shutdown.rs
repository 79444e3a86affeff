//! Graceful shutdown handling for the Latchkey server

use latchkey_core::CancelSignal;
use tracing::{info, warn};

/// Process-wide shutdown flag.
///
/// Triggering it also cancels every acquisition that was handed
/// [`cancel_signal`](Self::cancel_signal), so blocked trials stop waiting.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    cancel: CancelSignal,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once shutdown has been triggered
    pub async fn wait(&self) {
        self.cancel.cancelled().await
    }

    /// Cancellation handle for lock acquisitions tied to this shutdown
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }
}

/// Spawn a listener for Ctrl+C and SIGTERM that triggers the returned signal
pub fn wait_for_shutdown_signal() -> ShutdownSignal {
    let shutdown = ShutdownSignal::new();
    let trigger = shutdown.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
            _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
        }

        trigger.shutdown();
    });

    shutdown
}
