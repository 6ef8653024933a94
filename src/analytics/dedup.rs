//! "Has this visitor already been counted today?"
//!
//! The decision is a single conditional insert in the store: the row for
//! `(fingerprint, day)` either gets created by this call (first hit, unique) or
//! already exists (repeat). There is no separate existence check, so the answer
//! stays correct across tasks and across service instances sharing a database.
//! During ingestion the insert shares a transaction with the visit row, so a
//! beacon that fails to persist leaves no trace in the gate either.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

use crate::models::NormalizedVisit;
use crate::storage::{Storage, StorageResult};

/// Key under which seen fingerprints are stored
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[derive(Clone)]
pub struct DedupGate {
    storage: Arc<dyn Storage>,
}

impl DedupGate {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Returns `true` for the first hit of `fingerprint` on `day`.
    ///
    /// A storage failure is returned as an error and never as "unique".
    pub async fn register_visit(
        &self,
        fingerprint: &str,
        day: NaiveDate,
        seen_at: i64,
    ) -> StorageResult<bool> {
        let first_hit = self
            .storage
            .insert_fingerprint_if_absent(fingerprint, &day_key(day), seen_at)
            .await?;

        debug!(%day, first_hit, "Dedup gate decision");
        Ok(first_hit)
    }

    /// Decide uniqueness for `visit` and persist it together with the gate row.
    /// On error neither row is kept.
    pub async fn record_visit(
        &self,
        fingerprint: &str,
        day: NaiveDate,
        seen_at: i64,
        visit: &mut NormalizedVisit,
    ) -> StorageResult<bool> {
        let first_hit = self
            .storage
            .record_visit(fingerprint, &day_key(day), seen_at, visit)
            .await?;

        debug!(%day, first_hit, "Dedup gate decision");
        Ok(first_hit)
    }
}
