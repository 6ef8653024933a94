use anyhow::Result;
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

use crate::analytics::series::Granularity;
use crate::analytics::storage::{Dimension, DimensionCount, SeriesRow, TimeRange};
use crate::models::{NormalizedVisit, Site};
use crate::storage::trait_def::{pageview_filter, unix_now};
use crate::storage::{Storage, StorageError, StorageResult};

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn fingerprint_insert<'q>(fingerprint: &'q str, day: &'q str, first_seen: i64) -> SqliteQuery<'q> {
    sqlx::query(
        r#"
        INSERT INTO seen_fingerprints (fingerprint, day, first_seen)
        VALUES (?, ?, ?)
        ON CONFLICT(fingerprint, day) DO NOTHING
        "#,
    )
    .bind(fingerprint)
    .bind(day)
    .bind(first_seen)
}

fn visit_insert(visit: &NormalizedVisit) -> SqliteQuery<'_> {
    sqlx::query(
        r#"
        INSERT INTO visits (
            website_id, domain, event_type, occurred_at, referrer, url, pathname,
            device_type, os, browser, language, country, region, city,
            time_spent_on_page, is_unique,
            utm_source, utm_medium, utm_campaign, utm_term, utm_content
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(visit.website_id)
    .bind(&visit.domain)
    .bind(&visit.event_type)
    .bind(visit.timestamp)
    .bind(&visit.referrer)
    .bind(&visit.url)
    .bind(&visit.pathname)
    .bind(visit.device_type.as_str())
    .bind(&visit.os)
    .bind(&visit.browser)
    .bind(&visit.language)
    .bind(&visit.country)
    .bind(&visit.region)
    .bind(&visit.city)
    .bind(visit.time_spent_on_page)
    .bind(visit.is_unique)
    .bind(visit.utm.source.as_deref())
    .bind(visit.utm.medium.as_deref())
    .bind(visit.utm.campaign.as_deref())
    .bind(visit.utm.term.as_deref())
    .bind(visit.utm.content.as_deref())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        // Registered websites
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS websites (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        // First hit of each visitor fingerprint per day
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seen_fingerprints (
                fingerprint TEXT NOT NULL,
                day TEXT NOT NULL,
                first_seen INTEGER NOT NULL,
                PRIMARY KEY (fingerprint, day)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_seen_fingerprints_day ON seen_fingerprints(day)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                website_id INTEGER NOT NULL REFERENCES websites(id) ON DELETE CASCADE,
                domain TEXT NOT NULL,
                event_type TEXT NOT NULL,
                occurred_at INTEGER NOT NULL,
                referrer TEXT NOT NULL,
                url TEXT NOT NULL,
                pathname TEXT NOT NULL,
                device_type TEXT NOT NULL,
                os TEXT NOT NULL,
                browser TEXT NOT NULL,
                language TEXT NOT NULL,
                country TEXT NOT NULL,
                region TEXT NOT NULL,
                city TEXT NOT NULL,
                time_spent_on_page INTEGER NOT NULL DEFAULT 0,
                is_unique INTEGER NOT NULL,
                utm_source TEXT,
                utm_medium TEXT,
                utm_campaign TEXT,
                utm_term TEXT,
                utm_content TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_visits_website_time ON visits(website_id, occurred_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn register_site(&self, domain: &str) -> StorageResult<Site> {
        let created_at = unix_now()?;

        let result = sqlx::query(
            r#"
            INSERT INTO websites (domain, created_at)
            VALUES (?, ?)
            ON CONFLICT(domain) DO NOTHING
            "#,
        )
        .bind(domain)
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        let site = sqlx::query_as::<_, Site>(
            "SELECT id, domain, created_at FROM websites WHERE domain = ?",
        )
        .bind(domain)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(site)
    }

    async fn find_site(&self, domain: &str) -> StorageResult<Option<Site>> {
        let site = sqlx::query_as::<_, Site>(
            "SELECT id, domain, created_at FROM websites WHERE domain = ?",
        )
        .bind(domain)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(site)
    }

    async fn list_sites(&self) -> StorageResult<Vec<Site>> {
        let sites = sqlx::query_as::<_, Site>(
            "SELECT id, domain, created_at FROM websites ORDER BY domain ASC",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(sites)
    }

    async fn remove_site(&self, domain: &str) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM visits WHERE website_id IN (SELECT id FROM websites WHERE domain = ?)",
        )
        .bind(domain)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM websites WHERE domain = ?")
            .bind(domain)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_fingerprint_if_absent(
        &self,
        fingerprint: &str,
        day: &str,
        first_seen: i64,
    ) -> StorageResult<bool> {
        let result = fingerprint_insert(fingerprint, day, first_seen)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_fingerprints_before(&self, day: &str) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM seen_fingerprints WHERE day < ?")
            .bind(day)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_visit(&self, visit: &NormalizedVisit) -> StorageResult<i64> {
        let result = visit_insert(visit).execute(self.pool.as_ref()).await?;

        Ok(result.last_insert_rowid())
    }

    async fn record_visit(
        &self,
        fingerprint: &str,
        day: &str,
        first_seen: i64,
        visit: &mut NormalizedVisit,
    ) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await?;

        let seen = fingerprint_insert(fingerprint, day, first_seen)
            .execute(&mut *tx)
            .await?;
        visit.is_unique = seen.rows_affected() == 1;

        visit_insert(visit).execute(&mut *tx).await?;

        // Dropping the transaction before this point rolls back the fingerprint row
        tx.commit().await?;

        Ok(visit.is_unique)
    }

    async fn top_dimension(
        &self,
        website_id: i64,
        dimension: Dimension,
        range: TimeRange,
        limit: i64,
    ) -> StorageResult<Vec<DimensionCount>> {
        let column = dimension.column();
        let events = pageview_filter(dimension);
        let query = format!(
            r#"
            SELECT {column} AS label, COUNT(*) AS visits
            FROM visits
            WHERE website_id = ? AND occurred_at BETWEEN ? AND ? AND {column} IS NOT NULL {events}
            GROUP BY {column}
            ORDER BY COUNT(*) DESC, label ASC
            LIMIT ?
            "#
        );

        let rows = sqlx::query_as::<_, DimensionCount>(&query)
            .bind(website_id)
            .bind(range.start)
            .bind(range.end)
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(rows)
    }

    async fn series(
        &self,
        website_id: i64,
        range: TimeRange,
        granularity: Granularity,
    ) -> StorageResult<Vec<SeriesRow>> {
        let query = format!(
            r#"
            SELECT
                strftime('{format}', occurred_at, 'unixepoch') AS period,
                COUNT(*) AS visits,
                COALESCE(SUM(is_unique), 0) AS unique_visitors,
                COALESCE(AVG(time_spent_on_page), 0.0) AS avg_time_spent
            FROM visits
            WHERE website_id = ? AND occurred_at BETWEEN ? AND ? AND event_type = 'pageview'
            GROUP BY period
            "#,
            format = granularity.label_format()
        );

        let rows = sqlx::query_as::<_, SeriesRow>(&query)
            .bind(website_id)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(rows)
    }

    async fn count_pageviews_since(&self, website_id: i64, since: i64) -> StorageResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM visits
            WHERE website_id = ? AND occurred_at >= ? AND event_type = 'pageview'
            "#,
        )
        .bind(website_id)
        .bind(since)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count)
    }
}
