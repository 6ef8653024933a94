use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::analytics::series::Granularity;
use crate::analytics::storage::{Dimension, DimensionCount, SeriesRow, TimeRange};
use crate::models::{NormalizedVisit, Site};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("domain already registered")]
    Conflict,
    #[error("storage call timed out")]
    Timeout,
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Unavailable(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Register a website. Fails with `StorageError::Conflict` if the domain exists.
    async fn register_site(&self, domain: &str) -> StorageResult<Site>;

    /// Look up a registered website by its hostname
    async fn find_site(&self, domain: &str) -> StorageResult<Option<Site>>;

    async fn list_sites(&self) -> StorageResult<Vec<Site>>;

    /// Remove a website and its visits
    async fn remove_site(&self, domain: &str) -> StorageResult<bool>;

    /// Atomically record `(fingerprint, day)` as seen.
    /// Returns `true` only for the call that created the row.
    async fn insert_fingerprint_if_absent(
        &self,
        fingerprint: &str,
        day: &str,
        first_seen: i64,
    ) -> StorageResult<bool>;

    /// Delete seen fingerprints for days strictly before `day` (`YYYY-MM-DD`)
    async fn purge_fingerprints_before(&self, day: &str) -> StorageResult<u64>;

    /// Persist a visit and return its row id
    async fn insert_visit(&self, visit: &NormalizedVisit) -> StorageResult<i64>;

    /// Mark `(fingerprint, day)` as seen and persist `visit` in one transaction.
    ///
    /// `visit.is_unique` is set from whether the fingerprint row was created.
    /// If the visit cannot be written the fingerprint row is rolled back, so a
    /// retried beacon still counts as the visitor's first hit.
    async fn record_visit(
        &self,
        fingerprint: &str,
        day: &str,
        first_seen: i64,
        visit: &mut NormalizedVisit,
    ) -> StorageResult<bool>;

    /// Pageviews grouped by `dimension`, most frequent first
    /// ([`Dimension::EventTypes`] groups every event instead)
    async fn top_dimension(
        &self,
        website_id: i64,
        dimension: Dimension,
        range: TimeRange,
        limit: i64,
    ) -> StorageResult<Vec<DimensionCount>>;

    /// Pageviews grouped into UTC period labels for `granularity`, in no particular order
    async fn series(
        &self,
        website_id: i64,
        range: TimeRange,
        granularity: Granularity,
    ) -> StorageResult<Vec<SeriesRow>>;

    /// Pageviews recorded at or after `since` (Unix seconds)
    async fn count_pageviews_since(&self, website_id: i64, since: i64) -> StorageResult<i64>;
}

/// Current Unix time in seconds
pub(crate) fn unix_now() -> StorageResult<i64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| StorageError::Unavailable(e.into()))?
        .as_secs() as i64)
}

/// Extra `WHERE` clause keeping custom events out of pageview breakdowns
pub(crate) fn pageview_filter(dimension: Dimension) -> &'static str {
    if dimension.pageviews_only() {
        "AND event_type = 'pageview'"
    } else {
        ""
    }
}
