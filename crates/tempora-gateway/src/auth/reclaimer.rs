//! Scheduled purge of expired refresh tokens.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::AuthError;
use super::refresh::RefreshTokenStore;

/// Background job calling [`RefreshTokenStore::delete_expired`].
///
/// Runs once as soon as it is spawned and then every `interval`. A failed
/// run is logged and retried on the next tick; validation still removes
/// stale rows lazily in the meantime.
#[derive(Debug, Clone)]
pub struct ExpiryReclaimer {
    store: RefreshTokenStore,
    interval: Duration,
}

impl ExpiryReclaimer {
    /// Create a reclaimer for a store.
    #[must_use]
    pub const fn new(store: RefreshTokenStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Delete expired tokens now. Blocking.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn run_once(&self) -> Result<usize, AuthError> {
        let removed = self.store.delete_expired(Utc::now())?;
        if removed > 0 {
            tracing::info!(removed, "Reclaimed expired refresh tokens");
        } else {
            tracing::debug!("No expired refresh tokens to reclaim");
        }
        Ok(removed)
    }

    /// Spawn the job on the current runtime.
    #[must_use]
    pub fn spawn(self) -> ReclaimerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval_secs = self.interval.as_secs(), "Expiry reclaimer started");

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let job = self.clone();
                        match tokio::task::spawn_blocking(move || job.run_once()).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::warn!("Refresh token reclamation failed: {}", e),
                            Err(e) => tracing::warn!("Refresh token reclamation panicked: {}", e),
                        }
                    }
                }
            }

            tracing::info!("Expiry reclaimer stopped");
        });

        ReclaimerHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Handle to a running reclaimer.
#[derive(Debug)]
pub struct ReclaimerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReclaimerHandle {
    /// Stop the reclaimer and wait for the current run to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("Expiry reclaimer task failed: {}", e);
        }
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
