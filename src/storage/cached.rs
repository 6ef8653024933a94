use crate::analytics::series::Granularity;
use crate::analytics::storage::{Dimension, DimensionCount, SeriesRow, TimeRange};
use crate::models::{NormalizedVisit, Site};
use crate::storage::{Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-entry lifetime: known sites live for `hit_ttl`, known absences for `miss_ttl`
struct SiteExpiry {
    hit_ttl: Duration,
    miss_ttl: Duration,
}

impl SiteExpiry {
    fn ttl_for(&self, value: &Option<Site>) -> Duration {
        if value.is_some() {
            self.hit_ttl
        } else {
            self.miss_ttl
        }
    }
}

impl Expiry<String, Option<Site>> for SiteExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Option<Site>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.ttl_for(value))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Option<Site>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.ttl_for(value))
    }
}

/// Storage wrapper that caches website lookups by domain.
///
/// Every beacon resolves its domain to a site, so the lookup sits on the hot
/// path. Misses are cached too (as `None`) so a flood of beacons for an
/// unregistered domain does not reach the database each time. A miss expires
/// after its own, shorter TTL so a site registered by another instance (or by
/// `wren-admin`) starts accepting beacons quickly. Registration and removal
/// through this wrapper replace the affected entry immediately.
pub struct CachedStorage {
    /// Underlying storage implementation
    inner: Arc<dyn Storage>,
    /// Domain → site (or known absence)
    site_cache: Cache<String, Option<Site>>,
}

impl CachedStorage {
    pub fn new(
        inner: Arc<dyn Storage>,
        max_cache_entries: u64,
        hit_ttl: Duration,
        miss_ttl: Duration,
    ) -> Self {
        let site_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .expire_after(SiteExpiry { hit_ttl, miss_ttl })
            .build();

        Self { inner, site_cache }
    }

    async fn invalidate_site(&self, domain: &str) {
        self.site_cache.invalidate(domain).await;
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn register_site(&self, domain: &str) -> StorageResult<Site> {
        let site = self.inner.register_site(domain).await?;

        // Replace any cached miss for this domain
        self.site_cache
            .insert(domain.to_string(), Some(site.clone()))
            .await;

        Ok(site)
    }

    async fn find_site(&self, domain: &str) -> StorageResult<Option<Site>> {
        if let Some(cached) = self.site_cache.get(domain).await {
            return Ok(cached);
        }

        let result = self.inner.find_site(domain).await?;
        self.site_cache
            .insert(domain.to_string(), result.clone())
            .await;

        Ok(result)
    }

    async fn list_sites(&self) -> StorageResult<Vec<Site>> {
        self.inner.list_sites().await
    }

    async fn remove_site(&self, domain: &str) -> StorageResult<bool> {
        let removed = self.inner.remove_site(domain).await?;
        self.invalidate_site(domain).await;
        Ok(removed)
    }

    async fn insert_fingerprint_if_absent(
        &self,
        fingerprint: &str,
        day: &str,
        first_seen: i64,
    ) -> StorageResult<bool> {
        self.inner
            .insert_fingerprint_if_absent(fingerprint, day, first_seen)
            .await
    }

    async fn purge_fingerprints_before(&self, day: &str) -> StorageResult<u64> {
        self.inner.purge_fingerprints_before(day).await
    }

    async fn insert_visit(&self, visit: &NormalizedVisit) -> StorageResult<i64> {
        self.inner.insert_visit(visit).await
    }

    async fn record_visit(
        &self,
        fingerprint: &str,
        day: &str,
        first_seen: i64,
        visit: &mut NormalizedVisit,
    ) -> StorageResult<bool> {
        self.inner
            .record_visit(fingerprint, day, first_seen, visit)
            .await
    }

    async fn top_dimension(
        &self,
        website_id: i64,
        dimension: Dimension,
        range: TimeRange,
        limit: i64,
    ) -> StorageResult<Vec<DimensionCount>> {
        self.inner
            .top_dimension(website_id, dimension, range, limit)
            .await
    }

    async fn series(
        &self,
        website_id: i64,
        range: TimeRange,
        granularity: Granularity,
    ) -> StorageResult<Vec<SeriesRow>> {
        self.inner.series(website_id, range, granularity).await
    }

    async fn count_pageviews_since(&self, website_id: i64, since: i64) -> StorageResult<i64> {
        self.inner.count_pageviews_since(website_id, since).await
    }
}
