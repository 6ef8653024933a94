//! Analytics query models shared by the storage backends and the dashboard

use serde::{Deserialize, Serialize};

/// Column a top-N dashboard list is grouped by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dimension {
    Pages,
    Referrers,
    DeviceTypes,
    Oses,
    Browsers,
    Languages,
    Countries,
    Regions,
    Cities,
    UtmSource,
    UtmMedium,
    UtmCampaign,
    UtmTerm,
    UtmContent,
    /// Custom event names (`pageview`, `signup`, ...)
    EventTypes,
}

impl Dimension {
    pub const ALL: [Dimension; 15] = [
        Dimension::Pages,
        Dimension::Referrers,
        Dimension::DeviceTypes,
        Dimension::Oses,
        Dimension::Browsers,
        Dimension::Languages,
        Dimension::Countries,
        Dimension::Regions,
        Dimension::Cities,
        Dimension::UtmSource,
        Dimension::UtmMedium,
        Dimension::UtmCampaign,
        Dimension::UtmTerm,
        Dimension::UtmContent,
        Dimension::EventTypes,
    ];

    /// Column name in the `visits` table. Always a static identifier, so it is
    /// safe to interpolate into SQL.
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::Pages => "pathname",
            Dimension::Referrers => "referrer",
            Dimension::DeviceTypes => "device_type",
            Dimension::Oses => "os",
            Dimension::Browsers => "browser",
            Dimension::Languages => "language",
            Dimension::Countries => "country",
            Dimension::Regions => "region",
            Dimension::Cities => "city",
            Dimension::UtmSource => "utm_source",
            Dimension::UtmMedium => "utm_medium",
            Dimension::UtmCampaign => "utm_campaign",
            Dimension::UtmTerm => "utm_term",
            Dimension::UtmContent => "utm_content",
            Dimension::EventTypes => "event_type",
        }
    }

    /// URL segment used by the dashboard routes
    pub fn slug(&self) -> &'static str {
        match self {
            Dimension::Pages => "pages",
            Dimension::Referrers => "referrers",
            Dimension::DeviceTypes => "device-types",
            Dimension::Oses => "oses",
            Dimension::Browsers => "browsers",
            Dimension::Languages => "languages",
            Dimension::Countries => "countries",
            Dimension::Regions => "regions",
            Dimension::Cities => "cities",
            Dimension::UtmSource => "utm-source",
            Dimension::UtmMedium => "utm-medium",
            Dimension::UtmCampaign => "utm-campaign",
            Dimension::UtmTerm => "utm-term",
            Dimension::UtmContent => "utm-content",
            Dimension::EventTypes => "events",
        }
    }

    /// Whether the list counts pageviews only. Custom events are listed under
    /// [`Dimension::EventTypes`] and stay out of every other breakdown.
    pub fn pageviews_only(&self) -> bool {
        !matches!(self, Dimension::EventTypes)
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.slug() == slug)
    }
}

/// Inclusive range of Unix timestamps (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

/// One row of a top-N list
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DimensionCount {
    pub label: String,
    pub visits: i64,
}

/// One grouped period as returned by the store, before ordering
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SeriesRow {
    pub period: String,
    pub visits: i64,
    pub unique_visitors: i64,
    pub avg_time_spent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_slugs_round_trip() {
        for dimension in Dimension::ALL {
            assert_eq!(Dimension::from_slug(dimension.slug()), Some(dimension));
        }
        assert_eq!(Dimension::from_slug("passwords"), None);
    }

    #[test]
    fn test_only_event_list_includes_custom_events() {
        assert_eq!(Dimension::from_slug("events"), Some(Dimension::EventTypes));
        assert!(!Dimension::EventTypes.pageviews_only());
        assert!(Dimension::ALL
            .iter()
            .filter(|d| **d != Dimension::EventTypes)
            .all(Dimension::pageviews_only));
    }
}
