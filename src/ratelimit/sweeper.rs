//! Background eviction of idle identities.
//!
//! Windows expire lazily, so an identity that stops sending requests would
//! otherwise stay in the store forever. The sweeper periodically drops
//! identities whose windows have all elapsed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::clock::Clock;
use super::limiter::RateLimiter;

/// Handle to a running sweeper task. Dropping it stops the sweeper.
pub struct SweeperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(self) {
        // The task may already have exited, in which case there is nobody to notify
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            debug!(error = %e, "Sweeper task did not exit cleanly");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task that sweeps `limiter` every `interval` using `clock`.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_sweeper<C>(limiter: Arc<RateLimiter>, clock: Arc<C>, interval: Duration) -> SweeperHandle
where
    C: Clock + ?Sized + 'static,
{
    let (shutdown, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        info!(interval_ms = interval.as_millis() as u64, "Sweeper started");

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    let evicted = limiter.sweep(clock.now());
                    debug!(evicted, "Sweep complete");
                }
            }
        }

        info!("Sweeper stopped");
    });

    SweeperHandle { shutdown, task }
}
