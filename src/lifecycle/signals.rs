//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl-C) and SIGTERM
//! - Wait for an internal shutdown trigger (worker failure)
//! - Report which one ended the wait
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A signal handler that cannot be installed is logged and never fires

use crate::lifecycle::Shutdown;

/// Why the process is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
    WorkerFailure,
}

/// Block until a termination signal arrives or `shutdown` is triggered.
pub async fn wait_for_termination(shutdown: &Shutdown) -> Termination {
    tokio::select! {
        () = interrupt() => Termination::Interrupt,
        () = terminate() => Termination::Terminate,
        () = shutdown.wait() => Termination::WorkerFailure,
    }
}

async fn interrupt() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to install SIGINT handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
