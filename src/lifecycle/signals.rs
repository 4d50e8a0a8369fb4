//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers config reload, not shutdown

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Reload,
}

/// Wait for the next actionable signal.
#[cfg(unix)]
pub async fn next_signal() -> std::io::Result<Signal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| Signal::Shutdown),
        _ = terminate.recv() => Ok(Signal::Shutdown),
        _ = hangup.recv() => Ok(Signal::Reload),
    }
}

/// Wait for the next actionable signal.
#[cfg(not(unix))]
pub async fn next_signal() -> std::io::Result<Signal> {
    tokio::signal::ctrl_c().await.map(|_| Signal::Shutdown)
}
