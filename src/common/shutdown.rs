//! Unified shutdown handling
//!
//! Termination signals (ctrl-c, SIGTERM, SIGHUP) are latched into an
//! atomic flag that the state-machine loops observe between states, so a
//! node always unwinds through its own cleanup edges instead of dying in
//! place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

/// A latched termination flag shared with the signal task
#[derive(Debug, Clone)]
pub struct TerminationFlag {
    flag: Arc<AtomicBool>,
}

impl Default for TerminationFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationFlag {
    /// Create an unlatched flag
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Latch the flag
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether termination was requested
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Create a flag and spawn the signal listener task
    ///
    /// Must be called inside a tokio runtime. Listens for ctrl-c and, on
    /// unix, SIGTERM and SIGHUP.
    pub fn install() -> Self {
        let latch = Self::new();
        let for_task = latch.clone();

        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Termination signal received, unwinding through cleanup");
            for_task.request();
        });

        latch
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
        _ = sighup.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_starts_clear() {
        let latch = TerminationFlag::new();
        assert!(!latch.is_requested());
    }

    #[test]
    fn latch_is_sticky() {
        let latch = TerminationFlag::new();
        latch.request();
        assert!(latch.is_requested());
        assert!(latch.is_requested());
    }

    #[test]
    fn clones_share_the_latch() {
        let latch = TerminationFlag::new();
        let clone = latch.clone();
        clone.request();
        assert!(latch.is_requested());
    }
}
