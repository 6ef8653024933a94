//! Time-bucketed series for the dashboard charts
//!
//! The store groups visits by a period label whose format depends on the
//! granularity (`HH`, `YYYY-MM-DD` or `YYYY-MM`). Labels are parsed back into
//! instants before sorting; a label that does not parse fails the whole series.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::analytics::storage::{SeriesRow, TimeRange};

pub const METRIC_VISITS: &str = "visits";
pub const METRIC_UNIQUE_VISITORS: &str = "uniqueVisitors";
pub const METRIC_AVG_TIME_SPENT: &str = "avgTimeSpent";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("period label '{label}' is not a valid {granularity} label")]
pub struct FormatError {
    pub label: String,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    #[default]
    Day,
    Month,
}

impl Granularity {
    /// Unrecognised values fall back to `Day`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "hour" => Granularity::Hour,
            "month" => Granularity::Month,
            _ => Granularity::Day,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
            Granularity::Month => "month",
        }
    }

    /// `strftime`-style pattern of this granularity's labels
    pub fn label_format(&self) -> &'static str {
        match self {
            Granularity::Hour => "%H",
            Granularity::Day => "%Y-%m-%d",
            Granularity::Month => "%Y-%m",
        }
    }

    /// Label of the bucket containing `at` (UTC)
    pub fn label(&self, at: DateTime<Utc>) -> String {
        at.format(self.label_format()).to_string()
    }

    /// Parse a label back into the instant that starts its bucket.
    /// Hour labels are anchored on the Unix epoch day.
    pub fn parse_label(&self, label: &str) -> Result<NaiveDateTime, FormatError> {
        let err = || FormatError {
            label: label.to_string(),
            granularity: *self,
        };

        match self {
            Granularity::Hour => {
                if label.len() != 2 || !label.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(err());
                }
                let hour: u32 = label.parse().map_err(|_| err())?;
                NaiveDate::from_ymd_opt(1970, 1, 1)
                    .and_then(|d| d.and_hms_opt(hour, 0, 0))
                    .ok_or_else(err)
            }
            Granularity::Day => NaiveDate::parse_from_str(label, "%Y-%m-%d")
                .ok()
                .filter(|d| d.format("%Y-%m-%d").to_string() == label)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .ok_or_else(err),
            Granularity::Month => NaiveDate::parse_from_str(&format!("{label}-01"), "%Y-%m-%d")
                .ok()
                .filter(|d| d.format("%Y-%m").to_string() == label)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .ok_or_else(err),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub period: String,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, f64>,
}

impl SeriesPoint {
    pub fn new(period: impl Into<String>) -> Self {
        Self {
            period: period.into(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }
}

impl From<SeriesRow> for SeriesPoint {
    fn from(row: SeriesRow) -> Self {
        SeriesPoint::new(row.period)
            .with_metric(METRIC_VISITS, row.visits as f64)
            .with_metric(METRIC_UNIQUE_VISITORS, row.unique_visitors as f64)
            .with_metric(METRIC_AVG_TIME_SPENT, row.avg_time_spent)
    }
}

/// Sort points ascending by the instant their label denotes
pub fn order_series(
    points: Vec<SeriesPoint>,
    granularity: Granularity,
) -> Result<Vec<SeriesPoint>, FormatError> {
    let mut keyed = points
        .into_iter()
        .map(|point| Ok((granularity.parse_label(&point.period)?, point)))
        .collect::<Result<Vec<_>, FormatError>>()?;

    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(keyed.into_iter().map(|(_, point)| point).collect())
}

/// Every bucket label between `range.start` and `range.end`, in chronological order
pub fn expected_labels(range: TimeRange, granularity: Granularity) -> Vec<String> {
    let (Some(start), Some(end)) = (
        DateTime::<Utc>::from_timestamp(range.start, 0),
        DateTime::<Utc>::from_timestamp(range.end, 0),
    ) else {
        return vec![];
    };

    if start > end {
        return vec![];
    }

    match granularity {
        Granularity::Hour => {
            // Hour-of-day labels repeat after a full day
            let mut labels = Vec::new();
            let mut cursor = start - Duration::seconds(range.start.rem_euclid(3600));
            while cursor <= end && labels.len() < 24 {
                labels.push(granularity.label(cursor));
                cursor += Duration::hours(1);
            }
            labels
        }
        Granularity::Day => start
            .date_naive()
            .iter_days()
            .take_while(|d| *d <= end.date_naive())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .collect(),
        Granularity::Month => {
            let mut labels = Vec::new();
            let first = start.date_naive().with_day(1);
            let last = end.date_naive().with_day(1);
            let (Some(mut cursor), Some(last)) = (first, last) else {
                return labels;
            };
            while cursor <= last {
                labels.push(cursor.format("%Y-%m").to_string());
                match cursor.checked_add_months(Months::new(1)) {
                    Some(next) => cursor = next,
                    None => break,
                }
            }
            labels
        }
    }
}

/// Add zero-valued points for buckets the store returned no rows for, then
/// order the series.
pub fn fill_gaps(
    points: Vec<SeriesPoint>,
    range: TimeRange,
    granularity: Granularity,
    metric_names: &[&str],
) -> Result<Vec<SeriesPoint>, FormatError> {
    let present: HashSet<String> = points.iter().map(|p| p.period.clone()).collect();

    let mut filled = points;
    for label in expected_labels(range, granularity) {
        if !present.contains(&label) {
            let zero = metric_names
                .iter()
                .fold(SeriesPoint::new(label), |p, name| p.with_metric(name, 0.0));
            filled.push(zero);
        }
    }

    order_series(filled, granularity)
}

/// Render seconds as `"Xm Ys"`
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0m 0s".to_string();
    }
    let total = seconds as u64;
    format!("{}m {}s", total / 60, total % 60)
}
