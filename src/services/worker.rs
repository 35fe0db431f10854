use crate::services::callbacks::CallbackService;
use crate::services::storage::StorageManager;
use crate::utils::keyed_mutex::KeyedMutex;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Periodic maintenance task: temp reclamation, orphan reclamation and the
/// callback retry sweep. One failing step never stops the others, and the
/// loop only exits on shutdown.
pub struct BackgroundWorker {
    db: DatabaseConnection,
    storage: Arc<StorageManager>,
    callbacks: Arc<CallbackService>,
    record_locks: KeyedMutex,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<StorageManager>,
        callbacks: Arc<CallbackService>,
        record_locks: KeyedMutex,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            storage,
            callbacks,
            record_locks,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "Background worker started (interval: {:?})",
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        // The immediate first tick would race service startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                result = self.shutdown.changed() => {
                    if result.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Background worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_cycle(&self) {
        tracing::debug!("Maintenance cycle starting");

        let temp = self.storage.reclaim_temp().await;
        let orphans = self.storage.reclaim_orphans(&self.db).await;
        let sweep = self.callbacks.sweep().await;
        self.record_locks.cleanup();

        tracing::info!(
            temp_deleted = temp.deleted,
            orphans_deleted = orphans.deleted,
            callbacks_retried = sweep.retried,
            callbacks_timed_out = sweep.timed_out,
            "Maintenance cycle finished"
        );
    }
}
