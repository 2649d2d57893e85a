//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT) at startup
//! - Translate the first signal into the shutdown trigger
//! - Treat repeated signals as no-ops while shutdown is in progress
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Registration happens before anything else starts, so failure is fatal
//!   and no signal can slip past with the default disposition

use std::io;

use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

/// Registered interest in the termination signals.
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl SignalListener {
    /// Register for SIGINT and SIGTERM.
    #[cfg(unix)]
    pub fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next termination signal and return its name.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> &'static str {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "ctrl-c",
            Err(e) => {
                tracing::error!(error = %e, "Ctrl-C handler failed");
                std::future::pending().await
            }
        }
    }

    /// Forward signals to `shutdown` for the rest of the process lifetime.
    pub fn spawn(mut self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let signal = self.recv().await;
                if shutdown.trigger() {
                    tracing::warn!(signal, "Received system call, shutting down");
                } else {
                    tracing::warn!(signal, "Shutdown already in progress, ignoring signal");
                }
            }
        })
    }
}
