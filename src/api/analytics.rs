//! Dashboard API handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analytics::series::{
    fill_gaps, format_duration, METRIC_AVG_TIME_SPENT, METRIC_UNIQUE_VISITORS, METRIC_VISITS,
};
use crate::analytics::{Dimension, DimensionCount, Granularity, SeriesPoint, SeriesRow, TimeRange};
use crate::models::Site;

use super::error::ApiError;
use super::handlers::AppState;

/// Window used when the caller gives no `start`
const DEFAULT_RANGE_DAYS: i64 = 7;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    /// RFC 3339 start of the range (inclusive)
    pub start: Option<String>,
    /// RFC 3339 end of the range (inclusive); defaults to now
    pub end: Option<String>,
    pub granularity: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub visits: i64,
    pub unique_visitors: i64,
    pub avg_time_spent: f64,
    /// `avg_time_spent` as `"Xm Ys"`
    pub avg_duration: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopStatsResponse {
    pub domain: String,
    pub granularity: Granularity,
    pub series: Vec<SeriesPoint>,
    pub totals: Totals,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionResponse {
    pub domain: String,
    pub dimension: &'static str,
    pub items: Vec<DimensionCount>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveResponse {
    pub domain: String,
    pub pageviews: i64,
    pub window_secs: i64,
}

fn parse_instant(field: &str, raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ApiError::BadRequest(format!("invalid {field} '{raw}': {e}")))
}

/// Resolve the query's range against `now`
fn resolve_range(query: &RangeQuery, now: DateTime<Utc>) -> Result<TimeRange, ApiError> {
    let end = match query.end.as_deref() {
        Some(raw) => parse_instant("end", raw)?,
        None => now,
    };
    let start = match query.start.as_deref() {
        Some(raw) => parse_instant("start", raw)?,
        None => end - Duration::days(DEFAULT_RANGE_DAYS),
    };

    if start > end {
        return Err(ApiError::BadRequest(
            "start must not be after end".to_string(),
        ));
    }

    Ok(TimeRange {
        start: start.timestamp(),
        end: end.timestamp(),
    })
}

async fn resolve_site(state: &AppState, domain: &str) -> Result<Site, ApiError> {
    let domain = domain.trim().to_ascii_lowercase();
    state
        .storage
        .find_site(&domain)
        .await?
        .ok_or(ApiError::NotFound(domain))
}

/// Totals across all periods; the average is weighted by visits per period
fn totals(rows: &[SeriesRow]) -> Totals {
    let visits: i64 = rows.iter().map(|r| r.visits).sum();
    let unique_visitors = rows.iter().map(|r| r.unique_visitors).sum();
    let weighted: f64 = rows
        .iter()
        .map(|r| r.avg_time_spent * r.visits as f64)
        .sum();
    let avg_time_spent = if visits > 0 {
        weighted / visits as f64
    } else {
        0.0
    };

    Totals {
        visits,
        unique_visitors,
        avg_time_spent,
        avg_duration: format_duration(avg_time_spent),
    }
}

/// Visits, unique visitors and average time on page per period
pub async fn top_stats(
    State(state): State<Arc<AppState>>,
    Path(domain): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<TopStatsResponse>, ApiError> {
    let site = resolve_site(&state, &domain).await?;
    let range = resolve_range(&query, state.clock.now())?;
    let granularity = query
        .granularity
        .as_deref()
        .map(Granularity::parse)
        .unwrap_or_default();

    let rows = state.storage.series(site.id, range, granularity).await?;
    let totals = totals(&rows);

    let points = rows.into_iter().map(SeriesPoint::from).collect();
    let series = fill_gaps(
        points,
        range,
        granularity,
        &[METRIC_VISITS, METRIC_UNIQUE_VISITORS, METRIC_AVG_TIME_SPENT],
    )?;

    Ok(Json(TopStatsResponse {
        domain: site.domain,
        granularity,
        series,
        totals,
    }))
}

/// Top-N list for one dimension (pages, referrers, browsers, ...)
pub async fn top_dimension(
    State(state): State<Arc<AppState>>,
    Path((domain, dimension)): Path<(String, String)>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<DimensionResponse>, ApiError> {
    let dimension = Dimension::from_slug(&dimension)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown dimension '{dimension}'")))?;
    let site = resolve_site(&state, &domain).await?;
    let range = resolve_range(&query, state.clock.now())?;
    let limit = query
        .limit
        .unwrap_or(state.dashboard.top_limit)
        .clamp(1, MAX_LIMIT);

    let items = state
        .storage
        .top_dimension(site.id, dimension, range, limit)
        .await?;

    Ok(Json(DimensionResponse {
        domain: site.domain,
        dimension: dimension.slug(),
        items,
    }))
}

/// Pageviews within the live window
pub async fn live(
    State(state): State<Arc<AppState>>,
    Path(domain): Path<String>,
) -> Result<Json<LiveResponse>, ApiError> {
    let site = resolve_site(&state, &domain).await?;
    let window_secs = state.dashboard.live_window_secs;
    let since = state.clock.now().timestamp() - window_secs;

    let pageviews = state.storage.count_pageviews_since(site.id, since).await?;

    Ok(Json(LiveResponse {
        domain: site.domain,
        pageviews,
        window_secs,
    }))
}
