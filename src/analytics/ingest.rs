//! Beacon ingestion
//!
//! Turns one tracking-script beacon into one stored [`NormalizedVisit`]:
//! normalize, resolve the site, fingerprint the visitor with today's secret,
//! locate the IP, then let the dedup gate decide uniqueness and persist the
//! visit in one transaction. Validation and site resolution happen before any
//! write. Every storage call and the GeoIP lookup run under the configured
//! timeout.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::analytics::clock::{Clock, SystemClock};
use crate::analytics::dedup::DedupGate;
use crate::analytics::fingerprint::fingerprint;
use crate::analytics::geoip::GeoLookup;
use crate::analytics::models::GeoLocation;
use crate::analytics::normalizer::{normalize, ValidationError};
use crate::analytics::salt::SaltRotator;
use crate::config::AnalyticsConfig;
use crate::models::{Beacon, NormalizedVisit};
use crate::storage::{Storage, StorageError, StorageResult};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("website '{0}' is not registered")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct IngestService {
    storage: Arc<dyn Storage>,
    geo: Arc<dyn GeoLookup>,
    salts: Arc<SaltRotator>,
    gate: DedupGate,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
}

impl IngestService {
    pub fn new(
        storage: Arc<dyn Storage>,
        geo: Arc<dyn GeoLookup>,
        salts: Arc<SaltRotator>,
        config: &AnalyticsConfig,
    ) -> Self {
        Self {
            gate: DedupGate::new(Arc::clone(&storage)),
            storage,
            geo,
            salts,
            clock: Arc::new(SystemClock),
            call_timeout: Duration::from_millis(config.external_call_timeout_ms),
        }
    }

    /// Replace the wall clock, e.g. to cross day boundaries in tests
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn salts(&self) -> &Arc<SaltRotator> {
        &self.salts
    }

    pub async fn ingest(
        &self,
        beacon: Beacon,
        client_ip: IpAddr,
    ) -> Result<NormalizedVisit, IngestError> {
        let dims = normalize(&beacon).inspect_err(|e| {
            warn!(error = %e, "Rejected beacon");
        })?;

        let site = self
            .bounded(self.storage.find_site(&dims.domain))
            .await?
            .ok_or_else(|| {
                warn!(domain = %dims.domain, "Beacon for unregistered website");
                IngestError::NotFound(dims.domain.clone())
            })?;

        // One clock reading decides both the salt and the dedup day
        let now = self.clock.now();
        let today = now.date_naive();
        let secret = self.salts.get_or_create(now);
        let visitor = fingerprint(
            secret.value(),
            &dims.domain,
            &client_ip.to_string(),
            &beacon.user_agent,
        );

        let location = self.locate(client_ip).await?;

        let mut visit = NormalizedVisit {
            website_id: site.id,
            domain: dims.domain,
            event_type: normalize_event_type(&beacon.event_type),
            timestamp: beacon.timestamp.unwrap_or(now).timestamp(),
            referrer: dims.referrer,
            url: dims.url,
            pathname: dims.pathname,
            device_type: dims.device_type,
            os: dims.os,
            browser: dims.browser,
            language: beacon.language.trim().to_string(),
            country: location.country_or_unknown(),
            region: location.region_or_unknown(),
            city: location.city_or_unknown(),
            time_spent_on_page: beacon.time_spent_on_page.max(0),
            is_unique: false,
            utm: beacon.utm.normalized(),
        };

        let is_unique = self
            .bounded(
                self.gate
                    .record_visit(&visitor, today, now.timestamp(), &mut visit),
            )
            .await?;

        debug!(
            website_id = visit.website_id,
            is_unique,
            device = %visit.device_type,
            "Visit recorded"
        );
        Ok(visit)
    }

    /// GeoIP lookup on the blocking pool, under the configured timeout
    async fn locate(&self, ip: IpAddr) -> StorageResult<GeoLocation> {
        let geo = Arc::clone(&self.geo);
        let lookup = tokio::task::spawn_blocking(move || geo.lookup(ip));

        match tokio::time::timeout(self.call_timeout, lookup).await {
            Ok(Ok(location)) => Ok(location),
            Ok(Err(e)) => Err(StorageError::Unavailable(e.into())),
            Err(_) => {
                warn!(
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "GeoIP lookup timed out"
                );
                Err(StorageError::Timeout)
            }
        }
    }

    /// Run a storage call under the configured timeout
    async fn bounded<T, F>(&self, call: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| StorageError::Timeout)?
    }
}

fn normalize_event_type(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "pageview".to_string()
    } else {
        trimmed.to_ascii_lowercase()
    }
}
