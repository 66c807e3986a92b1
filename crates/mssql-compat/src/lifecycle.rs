//! Signal-driven shutdown.
//!
//! On SIGINT or SIGTERM (Ctrl-C elsewhere) the pool is closed with a bounded
//! wait. Close failures are logged; shutdown itself never fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pool::ConnectionManager;

/// Wait for a termination signal and return its name.
#[cfg(unix)]
pub async fn wait_for_termination() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(i), Ok(t)) => (i, t),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers, falling back to Ctrl-C: {}", e);
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

/// Wait for a termination signal and return its name.
#[cfg(not(unix))]
pub async fn wait_for_termination() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    "Ctrl-C"
}

/// Close the manager's pool, waiting at most `grace`.
pub async fn drain<M: ConnectionManager>(manager: &M, grace: Duration) {
    info!("Closing connection pool (timeout: {}s)", grace.as_secs());
    match manager.close(grace).await {
        Ok(()) => info!("Connection pool closed"),
        Err(e) => warn!("Connection pool did not close cleanly: {}", e),
    }
}

/// Handle to a running shutdown listener.
pub struct Shutdown {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Shutdown {
    /// Cancelled as soon as shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait until the pool has been drained.
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            warn!("Shutdown task failed: {}", e);
        }
    }
}

/// Drain `manager` when a termination signal arrives.
pub fn spawn_shutdown_listener<M: ConnectionManager>(manager: Arc<M>, grace: Duration) -> Shutdown {
    spawn_shutdown_on(manager, grace, wait_for_termination())
}

/// Drain `manager` once `trigger` resolves.
pub fn spawn_shutdown_on<M, F>(manager: Arc<M>, grace: Duration, trigger: F) -> Shutdown
where
    M: ConnectionManager,
    F: Future<Output = &'static str> + Send + 'static,
{
    let token = CancellationToken::new();
    let cancel = token.clone();

    let task = tokio::spawn(async move {
        let reason = trigger.await;
        info!("Received {}. Shutting down gracefully", reason);
        cancel.cancel();
        drain(manager.as_ref(), grace).await;
    });

    Shutdown { token, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::scripted::ScriptedManager;

    #[tokio::test]
    async fn test_drain_closes_pool() {
        let manager = ScriptedManager::new();
        manager.connect().await.unwrap();
        assert!(manager.is_connected());

        drain(&manager, Duration::from_secs(1)).await;
        assert!(!manager.is_connected());
        assert_eq!(manager.closes(), 1);
    }

    #[tokio::test]
    async fn test_listener_cancels_then_drains() {
        let manager = Arc::new(ScriptedManager::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let shutdown = spawn_shutdown_on(manager.clone(), Duration::from_secs(1), async move {
            let _ = rx.await;
            "test"
        });
        let token = shutdown.token();
        assert!(!token.is_cancelled());

        tx.send(()).unwrap();
        token.cancelled().await;
        shutdown.finished().await;
        assert_eq!(manager.closes(), 1);
    }

    #[tokio::test]
    async fn test_drain_survives_close_failure() {
        let manager = ScriptedManager::new();
        manager.connect().await.unwrap();
        manager.fail_close("connection reset by peer");

        drain(&manager, Duration::from_secs(1)).await;
        assert_eq!(manager.closes(), 1);
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_grace() {
        let manager = ScriptedManager::new();
        manager.connect().await.unwrap();
        manager.set_close_delay(Duration::from_secs(60));

        let started = tokio::time::Instant::now();
        drain(&manager, Duration::from_secs(2)).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(60));
        assert_eq!(manager.closes(), 1);
    }

    #[tokio::test]
    async fn test_listener_finishes_when_close_fails() {
        let manager = Arc::new(ScriptedManager::new());
        manager.fail_close("connection reset by peer");

        let shutdown = spawn_shutdown_on(manager.clone(), Duration::from_secs(1), async { "test" });
        let token = shutdown.token();
        shutdown.finished().await;
        assert!(token.is_cancelled());
        assert_eq!(manager.closes(), 1);
    }
}
