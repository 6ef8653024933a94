//! End-to-end ingestion tests against in-memory SQLite with a controllable clock

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wren::analytics::{
    Clock, Dimension, DimensionCount, GeoLocation, GeoLookup, Granularity, IngestError,
    IngestService, NoopGeo, SaltRotator, SeriesRow, TimeRange, ValidationError,
};
use wren::api::ApiError;
use wren::config::AnalyticsConfig;
use wren::models::{Beacon, DeviceType, NormalizedVisit, Site};
use wren::storage::{SqliteStorage, Storage, StorageError, StorageResult};

const CHROME_DESKTOP: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";
const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1";

struct TestClock(Mutex<DateTime<Utc>>);

impl TestClock {
    fn at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }

    fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

struct Harness {
    storage: Arc<dyn Storage>,
    service: IngestService,
    clock: Arc<TestClock>,
    site_id: i64,
}

async fn sqlite_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

async fn harness() -> Harness {
    harness_with(sqlite_storage().await, Arc::new(NoopGeo), AnalyticsConfig::default()).await
}

async fn harness_with(
    storage: Arc<dyn Storage>,
    geo: Arc<dyn GeoLookup>,
    config: AnalyticsConfig,
) -> Harness {
    let site = storage.register_site("example.com").await.unwrap();

    let clock = TestClock::at(Utc.with_ymd_and_hms(2024, 5, 1, 23, 50, 0).unwrap());
    let service = IngestService::new(
        Arc::clone(&storage),
        geo,
        Arc::new(SaltRotator::new(2)),
        &config,
    )
    .with_clock(clock.clone());

    Harness {
        storage,
        service,
        clock,
        site_id: site.id,
    }
}

fn beacon(url: &str, referrer: &str, user_agent: &str) -> Beacon {
    serde_json::from_value(json!({
        "referrer": referrer,
        "url": url,
        "pathname": "",
        "userAgent": user_agent,
        "language": "en-US",
        "timeSpentOnPage": 12,
        "utmSource": "newsletter"
    }))
    .unwrap()
}

fn ip(addr: &str) -> IpAddr {
    addr.parse().unwrap()
}

async fn stored_pages(h: &Harness) -> i64 {
    let range = TimeRange {
        start: 0,
        end: i64::MAX / 2,
    };
    h.storage
        .top_dimension(h.site_id, Dimension::Pages, range, 100)
        .await
        .unwrap()
        .iter()
        .map(|r| r.visits)
        .sum()
}

#[tokio::test]
async fn test_first_visit_is_unique_and_normalized() {
    let h = harness().await;

    let visit = h
        .service
        .ingest(
            beacon("https://example.com/blog/post?x=1", "", CHROME_DESKTOP),
            ip("203.0.113.7"),
        )
        .await
        .unwrap();

    assert!(visit.is_unique);
    assert_eq!(visit.website_id, h.site_id);
    assert_eq!(visit.domain, "example.com");
    assert_eq!(visit.referrer, "Direct");
    assert_eq!(visit.pathname, "/blog/post");
    assert_eq!(visit.device_type, DeviceType::Desktop);
    assert_eq!(visit.country, "Unknown");
    assert_eq!(visit.event_type, "pageview");
    assert_eq!(visit.time_spent_on_page, 12);
    assert_eq!(visit.utm.source.as_deref(), Some("newsletter"));
    // No client timestamp, so the server clock is used
    assert_eq!(visit.timestamp, h.clock.now().timestamp());
    assert_eq!(stored_pages(&h).await, 1);
}

#[tokio::test]
async fn test_repeat_visit_same_day_is_not_unique() {
    let h = harness().await;
    let first = h
        .service
        .ingest(
            beacon("https://example.com/", "https://t.co/abc?x=1", CHROME_DESKTOP),
            ip("203.0.113.7"),
        )
        .await
        .unwrap();
    assert!(first.is_unique);
    assert_eq!(first.referrer, "t.co/abc");

    h.clock.advance(Duration::minutes(5));
    let second = h
        .service
        .ingest(
            beacon("https://example.com/pricing", "", CHROME_DESKTOP),
            ip("203.0.113.7"),
        )
        .await
        .unwrap();
    assert!(!second.is_unique);

    // Any identity field change is a different visitor
    let other_ua = h
        .service
        .ingest(
            beacon("https://example.com/", "", SAFARI_IPHONE),
            ip("203.0.113.7"),
        )
        .await
        .unwrap();
    assert!(other_ua.is_unique);
    assert_eq!(other_ua.device_type, DeviceType::Mobile);

    let other_ip = h
        .service
        .ingest(
            beacon("https://example.com/", "", CHROME_DESKTOP),
            ip("203.0.113.8"),
        )
        .await
        .unwrap();
    assert!(other_ip.is_unique);

    assert_eq!(stored_pages(&h).await, 4);
}

#[tokio::test]
async fn test_uniqueness_resets_on_new_utc_day() {
    let h = harness().await;
    let visitor = || beacon("https://example.com/", "", CHROME_DESKTOP);

    assert!(h.service.ingest(visitor(), ip("198.51.100.4")).await.unwrap().is_unique);

    // 23:50 → 00:05 next day
    h.clock.advance(Duration::minutes(15));
    assert!(h.service.ingest(visitor(), ip("198.51.100.4")).await.unwrap().is_unique);
    assert!(!h.service.ingest(visitor(), ip("198.51.100.4")).await.unwrap().is_unique);

    assert_eq!(h.service.salts().len(), 2);
}

#[tokio::test]
async fn test_unknown_domain_is_not_found_and_not_stored() {
    let h = harness().await;

    let err = h
        .service
        .ingest(
            beacon("https://unregistered.org/", "", CHROME_DESKTOP),
            ip("203.0.113.7"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::NotFound(ref d) if d == "unregistered.org"));
    assert_eq!(stored_pages(&h).await, 0);
}

#[tokio::test]
async fn test_invalid_referrer_is_rejected_before_any_write() {
    let h = harness().await;

    let err = h
        .service
        .ingest(
            beacon("https://example.com/", "not a url", CHROME_DESKTOP),
            ip("203.0.113.7"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Validation(ValidationError::InvalidReferrer { .. })
    ));
    assert_eq!(stored_pages(&h).await, 0);

    // The rejected beacon did not consume the visitor's first hit
    let visit = h
        .service
        .ingest(
            beacon("https://example.com/", "", CHROME_DESKTOP),
            ip("203.0.113.7"),
        )
        .await
        .unwrap();
    assert!(visit.is_unique);
}

#[tokio::test]
async fn test_client_timestamp_is_stored() {
    let h = harness().await;
    let mut b = beacon("https://example.com/", "", CHROME_DESKTOP);
    let sent_at = Utc.with_ymd_and_hms(2024, 5, 1, 23, 49, 30).unwrap();
    b.timestamp = Some(sent_at);

    let visit = h.service.ingest(b, ip("203.0.113.7")).await.unwrap();
    assert_eq!(visit.timestamp, sent_at.timestamp());
}

#[tokio::test]
async fn test_concurrent_identical_beacons_count_one_unique() {
    let h = Arc::new(harness().await);
    let mut handles = vec![];

    for _ in 0..10 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            h.service
                .ingest(
                    beacon("https://example.com/", "", CHROME_DESKTOP),
                    ip("192.0.2.10"),
                )
                .await
                .unwrap()
                .is_unique
        }));
    }

    let mut unique = 0;
    for handle in handles {
        if handle.await.unwrap() {
            unique += 1;
        }
    }
    assert_eq!(unique, 1);
    assert_eq!(stored_pages(&h).await, 10);
}

/// Storage over in-memory SQLite that can be told to misbehave during ingestion
struct FaultyStorage {
    inner: Arc<dyn Storage>,
    /// `find_site` answers with an id that has no row, so the visit insert fails
    stale_lookups: AtomicUsize,
    /// `record_visit` fails before reaching the store
    failed_records: AtomicUsize,
    record_delay: Option<std::time::Duration>,
}

impl FaultyStorage {
    async fn new() -> Self {
        Self {
            inner: sqlite_storage().await,
            stale_lookups: AtomicUsize::new(0),
            failed_records: AtomicUsize::new(0),
            record_delay: None,
        }
    }

    fn inner(&self) -> &dyn Storage {
        self.inner.as_ref()
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Storage for FaultyStorage {
    async fn init(&self) -> anyhow::Result<()> {
        self.inner().init().await
    }

    async fn register_site(&self, domain: &str) -> StorageResult<Site> {
        self.inner().register_site(domain).await
    }

    async fn find_site(&self, domain: &str) -> StorageResult<Option<Site>> {
        let site = self.inner().find_site(domain).await?;
        if take_one(&self.stale_lookups) {
            return Ok(site.map(|s| Site {
                id: s.id + 1_000_000,
                ..s
            }));
        }
        Ok(site)
    }

    async fn list_sites(&self) -> StorageResult<Vec<Site>> {
        self.inner().list_sites().await
    }

    async fn remove_site(&self, domain: &str) -> StorageResult<bool> {
        self.inner().remove_site(domain).await
    }

    async fn insert_fingerprint_if_absent(
        &self,
        fingerprint: &str,
        day: &str,
        first_seen: i64,
    ) -> StorageResult<bool> {
        self.inner()
            .insert_fingerprint_if_absent(fingerprint, day, first_seen)
            .await
    }

    async fn purge_fingerprints_before(&self, day: &str) -> StorageResult<u64> {
        self.inner().purge_fingerprints_before(day).await
    }

    async fn insert_visit(&self, visit: &NormalizedVisit) -> StorageResult<i64> {
        self.inner().insert_visit(visit).await
    }

    async fn record_visit(
        &self,
        fingerprint: &str,
        day: &str,
        first_seen: i64,
        visit: &mut NormalizedVisit,
    ) -> StorageResult<bool> {
        if take_one(&self.failed_records) {
            return Err(StorageError::Unavailable(anyhow::anyhow!(
                "seen_fingerprints insert failed"
            )));
        }
        if let Some(delay) = self.record_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner()
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
        self.inner()
            .top_dimension(website_id, dimension, range, limit)
            .await
    }

    async fn series(
        &self,
        website_id: i64,
        range: TimeRange,
        granularity: Granularity,
    ) -> StorageResult<Vec<SeriesRow>> {
        self.inner().series(website_id, range, granularity).await
    }

    async fn count_pageviews_since(&self, website_id: i64, since: i64) -> StorageResult<i64> {
        self.inner().count_pageviews_since(website_id, since).await
    }
}

/// GeoIP resolver that blocks its thread, like a lookup on a cold disk
struct SlowGeo(std::time::Duration);

impl GeoLookup for SlowGeo {
    fn lookup(&self, _ip: IpAddr) -> GeoLocation {
        std::thread::sleep(self.0);
        GeoLocation::default()
    }
}

fn timeout_config(ms: u64) -> AnalyticsConfig {
    AnalyticsConfig {
        external_call_timeout_ms: ms,
        ..AnalyticsConfig::default()
    }
}

#[tokio::test]
async fn test_failed_visit_write_keeps_first_hit_for_retry() {
    let storage = FaultyStorage::new().await;
    storage.stale_lookups.store(1, Ordering::SeqCst);
    let h = harness_with(Arc::new(storage), Arc::new(NoopGeo), AnalyticsConfig::default()).await;
    let visitor = || beacon("https://example.com/", "", CHROME_DESKTOP);

    // The fingerprint insert succeeds inside the transaction, the visit insert does not
    let err = h.service.ingest(visitor(), ip("203.0.113.7")).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::Storage(StorageError::Unavailable(_))
    ));
    assert_eq!(stored_pages(&h).await, 0);

    let retry = h.service.ingest(visitor(), ip("203.0.113.7")).await.unwrap();
    assert!(retry.is_unique);
    assert_eq!(stored_pages(&h).await, 1);
}

#[tokio::test]
async fn test_dedup_failure_is_a_storage_error_and_writes_nothing() {
    let storage = FaultyStorage::new().await;
    storage.failed_records.store(1, Ordering::SeqCst);
    let h = harness_with(Arc::new(storage), Arc::new(NoopGeo), AnalyticsConfig::default()).await;

    let err = h
        .service
        .ingest(
            beacon("https://example.com/", "", CHROME_DESKTOP),
            ip("203.0.113.7"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Storage(StorageError::Unavailable(_))
    ));
    assert_eq!(ApiError::from(err).status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(stored_pages(&h).await, 0);

    // A storage failure is never reported as unique, and never consumes the first hit
    let retry = h
        .service
        .ingest(
            beacon("https://example.com/", "", CHROME_DESKTOP),
            ip("203.0.113.7"),
        )
        .await
        .unwrap();
    assert!(retry.is_unique);
}

#[tokio::test]
async fn test_slow_storage_times_out_as_unavailable() {
    let mut storage = FaultyStorage::new().await;
    storage.record_delay = Some(std::time::Duration::from_millis(200));
    let h = harness_with(Arc::new(storage), Arc::new(NoopGeo), timeout_config(1)).await;

    let err = h
        .service
        .ingest(
            beacon("https://example.com/", "", CHROME_DESKTOP),
            ip("203.0.113.7"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Storage(StorageError::Timeout)));
    assert_eq!(ApiError::from(err).status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(stored_pages(&h).await, 0);
}

#[tokio::test]
async fn test_slow_geoip_lookup_times_out() {
    let h = harness_with(
        sqlite_storage().await,
        Arc::new(SlowGeo(std::time::Duration::from_millis(300))),
        timeout_config(20),
    )
    .await;

    let err = h
        .service
        .ingest(
            beacon("https://example.com/", "", CHROME_DESKTOP),
            ip("203.0.113.7"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Storage(StorageError::Timeout)));
    assert_eq!(stored_pages(&h).await, 0);
}
