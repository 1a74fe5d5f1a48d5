//! Cooperative shutdown signalling.
//!
//! Any request can ask for the process to stop by calling
//! [`ShutdownSignal::signal`]. The request never blocks on it: the channel
//! holds one message and only the first caller gets to queue it. The
//! top-level dispatcher owns the single [`ShutdownListener`] and waits on it
//! alongside the OS interrupt and terminate signals.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Why the process is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C / SIGINT.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Raised from inside the request pipeline.
    Requested(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("interrupt"),
            Self::Terminate => f.write_str("terminate"),
            Self::Requested(message) => write!(f, "requested: {message}"),
        }
    }
}

/// Create a connected signal/listener pair.
pub fn channel() -> (ShutdownSignal, ShutdownListener) {
    let (tx, rx) = mpsc::channel(1);
    let signal = ShutdownSignal {
        tx,
        requested: Arc::new(AtomicBool::new(false)),
    };
    (signal, ShutdownListener { rx })
}

/// Cloneable sending half, shared by everything that may request shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: mpsc::Sender<ShutdownReason>,
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Request shutdown. Returns `true` only for the call that queued the request.
    pub fn signal(&self, reason: ShutdownReason) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            return false;
        }

        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Shutdown request could not be queued");
                false
            }
        }
    }
}

/// Receiving half. Consumed by value, so only one shutdown sequence can run.
#[derive(Debug)]
pub struct ShutdownListener {
    rx: mpsc::Receiver<ShutdownReason>,
}

impl ShutdownListener {
    /// Resolve on the first of: an in-band request, Ctrl+C, or SIGTERM.
    pub async fn wait(mut self) -> ShutdownReason {
        let requested = async {
            match self.rx.recv().await {
                Some(reason) => reason,
                // Every signal handle is gone; only OS signals remain.
                None => std::future::pending().await,
            }
        };

        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let reason = tokio::select! {
            reason = requested => reason,
            _ = ctrl_c => ShutdownReason::Interrupt,
            _ = terminate => ShutdownReason::Terminate,
        };

        info!(reason = %reason, "Shutdown signal received");
        reason
    }

    /// Wait for an in-band request only, ignoring OS signals.
    pub async fn recv(mut self) -> Option<ShutdownReason> {
        self.rx.recv().await
    }
}
