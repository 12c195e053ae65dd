//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] is cloned into every long-running component (UDP
//! listener, pipeline worker, admin server). When SIGINT/SIGTERM arrives, or
//! [`ShutdownSignal::trigger`] is called, every subscriber is notified. The
//! listener stops reading, the worker drains what is already queued and the
//! process exits once the drain finishes or [`ShutdownSignal::timeout`]
//! elapses.
//!
//! # Example
//!
//! ```rust,ignore
//! use notifilter::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let mut receiver = shutdown.subscribe();
//!
//! tokio::spawn(async move {
//!     loop {
//!         tokio::select! {
//!             _ = receiver.recv() => break,
//!             // ... read datagrams
//!         }
//!     }
//! });
//!
//! shutdown.wait().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Default drain timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
    /// How long to wait for queued work to drain
    timeout: Duration,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until SIGINT or SIGTERM (or a programmatic trigger), then
    /// notify all subscribers.
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
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
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let mut triggered = self.sender.subscribe();
        if self.is_shutdown() {
            return;
        }

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = triggered.recv() => {
                return;
            }
        }

        self.notify();
    }

    /// Receiver that yields once shutdown starts.
    ///
    /// Subscribe before spawning the task that awaits it, otherwise a
    /// trigger sent in between is missed.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Start shutdown without an OS signal (tests, fatal errors).
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        self.notify();
    }

    fn notify(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
