//! Periodic cleanup of expired auth state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::service::AuthService;

/// Background task calling [`AuthService::prune_expired`] on an interval.
pub struct Reaper;

impl Reaper {
    /// Spawns the cleanup loop on the current runtime.
    ///
    /// The first pass runs one `period` after spawning.
    #[must_use]
    pub fn spawn(service: Arc<AuthService>, period: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Auth state reaper started");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.prune_expired().await {
                            Ok(report) if report.total() > 0 => {
                                info!(removed = report.total(), "Expired auth state removed");
                            }
                            Ok(_) => debug!("Reaper pass found nothing to remove"),
                            Err(e) => error!(error = %e, "Reaper pass failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Auth state reaper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        ReaperHandle { shutdown_tx, task }
    }
}

/// Handle to a running [`Reaper`].
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stops the loop and waits for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Reaper task ended abnormally");
        }
    }

    /// Returns `true` if the task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl std::fmt::Debug for ReaperHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaperHandle")
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
