use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::infrastructure::config::WebSocketConfig;
use crate::session::{CloseReason, SessionRegistry};

/// Background task that terminates half-closed sessions.
///
/// A socket can die without the close/error event path running; its session
/// then holds a persistence handle and a broker channel forever. The sweep
/// catches those by checking whether the outbound transport is gone while
/// the session never reached `Closing`.
pub struct SweepTask {
    config: WebSocketConfig,
    registry: Arc<SessionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl SweepTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<SessionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(Duration::from_secs(self.config.sweep_interval));

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval,
            "Session sweep task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Sweep task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.sweep().await;
                }
            }
        }

        tracing::info!("Sweep task stopped");
    }

    async fn sweep(&self) {
        let half_closed = self.registry.find_half_closed().await;
        let terminated = half_closed.len();

        for session in half_closed {
            tracing::info!(
                connection_id = %session.id(),
                device = %session.identity().uid,
                "Terminating half-closed session"
            );
            session.close(CloseReason::Swept).await;
            self.registry.remove(session.id());
        }

        if terminated > 0 {
            tracing::info!(terminated, "Sweep terminated half-closed sessions");
        }
    }
}
