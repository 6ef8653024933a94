//! Periodic purge of expired dedup state
//!
//! Seen-fingerprint rows and daily secrets share one retention window. Once a
//! day falls out of it, its fingerprints can no longer be reproduced and the
//! rows serve no purpose.

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info};

use crate::analytics::clock::Clock;
use crate::analytics::dedup::day_key;
use crate::analytics::salt::{retention_cutoff, SaltRotator};
use crate::storage::{Storage, StorageResult};

/// Delete stored fingerprints outside a `retention_days` window ending on
/// `today`. Returns the number of rows deleted.
pub async fn purge_fingerprints(
    storage: &dyn Storage,
    today: NaiveDate,
    retention_days: u32,
) -> StorageResult<u64> {
    let cutoff = retention_cutoff(today, retention_days);
    let purged = storage.purge_fingerprints_before(&day_key(cutoff)).await?;

    info!(purged, %cutoff, "Purged expired visitor fingerprints");
    Ok(purged)
}

/// Purge fingerprints and secrets older than the rotator's retention window
/// as of `now`. Returns the number of fingerprint rows deleted.
pub async fn purge_expired(
    storage: &dyn Storage,
    salts: &SaltRotator,
    now: DateTime<Utc>,
) -> StorageResult<u64> {
    let today = now.date_naive();
    salts.evict_expired(today);
    purge_fingerprints(storage, today, salts.retention_days()).await
}

/// Background purge loop, stopped through [`RetentionTask::shutdown`]
pub struct RetentionTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RetentionTask {
    pub fn spawn(
        storage: Arc<dyn Storage>,
        salts: Arc<SaltRotator>,
        clock: Arc<dyn Clock>,
        interval_secs: u64,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = purge_expired(storage.as_ref(), &salts, clock.now()).await {
                            error!("Failed to purge expired fingerprints: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Shutdown signal received, stopping retention task");
                            break;
                        }
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the loop to stop and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("Retention task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_purge_keeps_retention_window() {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        let salts = SaltRotator::new(2);

        for day in ["2024-03-08", "2024-03-09", "2024-03-10"] {
            assert!(storage
                .insert_fingerprint_if_absent("abc", day, 0)
                .await
                .unwrap());
        }

        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let purged = purge_expired(&storage, &salts, now).await.unwrap();
        assert_eq!(purged, 1);

        // Yesterday is still inside the window
        assert!(!storage
            .insert_fingerprint_if_absent("abc", "2024-03-09", 0)
            .await
            .unwrap());
        assert!(storage
            .insert_fingerprint_if_absent("abc", "2024-03-08", 0)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_purge_fingerprints_without_rotator() {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();

        for day in ["2024-03-01", "2024-03-05", "2024-03-09", "2024-03-10"] {
            storage
                .insert_fingerprint_if_absent("abc", day, 0)
                .await
                .unwrap();
        }

        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let purged = purge_fingerprints(&storage, today, 6).await.unwrap();
        assert_eq!(purged, 1);

        let purged = purge_fingerprints(&storage, today, 1).await.unwrap();
        assert_eq!(purged, 2);
    }
}
