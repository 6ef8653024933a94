use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_event_type() -> String {
    "pageview".to_string()
}

/// UTM campaign parameters reported by the tracking script
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtmParams {
    #[serde(default, rename = "utmSource")]
    pub source: Option<String>,
    #[serde(default, rename = "utmMedium")]
    pub medium: Option<String>,
    #[serde(default, rename = "utmCampaign")]
    pub campaign: Option<String>,
    #[serde(default, rename = "utmTerm")]
    pub term: Option<String>,
    #[serde(default, rename = "utmContent")]
    pub content: Option<String>,
}

impl UtmParams {
    /// Drop blank values so they group as "not set" rather than as ""
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            source: clean(self.source),
            medium: clean(self.medium),
            campaign: clean(self.campaign),
            term: clean(self.term),
            content: clean(self.content),
        }
    }
}

/// Raw event submitted by the tracking script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beacon {
    /// Client-side event time; the server clock is used when absent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default = "default_event_type")]
    pub event_type: String,

    /// `document.referrer`; empty or null for direct traffic
    #[serde(default)]
    pub referrer: Option<String>,

    /// Absolute URL of the visited page
    pub url: String,

    #[serde(default)]
    pub pathname: String,

    #[serde(default)]
    pub user_agent: String,

    #[serde(default)]
    pub language: String,

    /// Seconds spent on the page
    #[serde(default)]
    pub time_spent_on_page: i64,

    #[serde(flatten)]
    pub utm: UtmParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    Bot,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "Mobile",
            DeviceType::Tablet => "Tablet",
            DeviceType::Desktop => "Desktop",
            DeviceType::Bot => "Bot",
            DeviceType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analytics record persisted once per accepted beacon
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedVisit {
    pub website_id: i64,
    pub domain: String,
    pub event_type: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    /// `host + path` of the referrer, or "Direct"
    pub referrer: String,
    pub url: String,
    pub pathname: String,
    pub device_type: DeviceType,
    pub os: String,
    pub browser: String,
    pub language: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub time_spent_on_page: i64,
    pub is_unique: bool,
    #[serde(flatten)]
    pub utm: UtmParams,
}
