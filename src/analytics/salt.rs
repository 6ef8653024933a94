//! Per-day random salts for visitor fingerprints
//!
//! One secret exists per UTC calendar day. It is generated the first time the
//! day is seen and reused until the day rolls over. Secrets are held in memory
//! only, so once a day's secret is evicted (or the process restarts) nothing
//! can link that day's fingerprints back to a visitor.

use chrono::{DateTime, Days, NaiveDate, Utc};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Bytes of entropy in a generated secret
pub const SECRET_LEN: usize = 32;

type SecretGenerator = dyn Fn() -> Vec<u8> + Send + Sync;

/// First day still inside a `retention_days` window ending on `today`.
/// The window counts `today`, so `2` keeps today and yesterday.
pub fn retention_cutoff(today: NaiveDate, retention_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(retention_days.max(1) - 1)))
        .unwrap_or(NaiveDate::MIN)
}

#[derive(Clone)]
pub struct DailySecret {
    pub day: NaiveDate,
    pub generated_at: DateTime<Utc>,
    value: Arc<[u8]>,
}

impl DailySecret {
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

// Never print the secret itself
impl fmt::Debug for DailySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DailySecret")
            .field("day", &self.day)
            .field("generated_at", &self.generated_at)
            .field("value", &"<redacted>")
            .finish()
    }
}

fn random_secret() -> Vec<u8> {
    let bytes: [u8; SECRET_LEN] = rand::random();
    bytes.to_vec()
}

/// Day → secret cache owned by the ingestion service
pub struct SaltRotator {
    secrets: DashMap<NaiveDate, DailySecret>,
    retention_days: u32,
    generator: Box<SecretGenerator>,
}

impl SaltRotator {
    /// Rotator backed by the thread-local CSPRNG. `retention_days` counts the
    /// current day, so `2` keeps today's and yesterday's secrets.
    pub fn new(retention_days: u32) -> Self {
        Self::with_generator(retention_days, random_secret)
    }

    /// Rotator with a caller-provided secret source
    pub fn with_generator<F>(retention_days: u32, generator: F) -> Self
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            secrets: DashMap::new(),
            retention_days: retention_days.max(1),
            generator: Box::new(generator),
        }
    }

    /// Secret for the UTC day containing `now`, generating it on first use.
    ///
    /// Creation happens under the shard lock of the day's entry, so callers
    /// racing on a new day all receive the same secret.
    pub fn get_or_create(&self, now: DateTime<Utc>) -> DailySecret {
        let day = now.date_naive();

        if let Some(existing) = self.secrets.get(&day) {
            return existing.clone();
        }

        let mut created = false;
        let secret = self
            .secrets
            .entry(day)
            .or_insert_with(|| {
                created = true;
                DailySecret {
                    day,
                    generated_at: now,
                    value: Arc::from((self.generator)()),
                }
            })
            .clone();

        if created {
            info!(%day, "Generated visitor salt for new day");
            self.evict_expired(day);
        }

        secret
    }

    /// First day still inside the retention window relative to `today`
    pub fn oldest_retained_day(&self, today: NaiveDate) -> NaiveDate {
        retention_cutoff(today, self.retention_days)
    }

    /// Drop secrets older than the retention window. Returns how many were removed.
    pub fn evict_expired(&self, today: NaiveDate) -> usize {
        let cutoff = self.oldest_retained_day(today);
        let before = self.secrets.len();
        self.secrets.retain(|day, _| *day >= cutoff);
        let evicted = before.saturating_sub(self.secrets.len());
        if evicted > 0 {
            debug!(evicted, %cutoff, "Evicted expired visitor salts");
        }
        evicted
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl Default for SaltRotator {
    fn default() -> Self {
        Self::new(2)
    }
}
