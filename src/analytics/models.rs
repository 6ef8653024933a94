//! Data models for analytics

use serde::{Deserialize, Serialize};

/// Value stored for any location field the GeoIP database cannot resolve
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Geographic location information derived from IP address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Country name (English)
    pub country: Option<String>,

    /// First-level subdivision: region/state/province
    pub region: Option<String>,

    /// City name
    pub city: Option<String>,
}

impl GeoLocation {
    pub fn country_or_unknown(&self) -> String {
        or_unknown(&self.country)
    }

    pub fn region_or_unknown(&self) -> String {
        or_unknown(&self.region)
    }

    pub fn city_or_unknown(&self) -> String {
        or_unknown(&self.city)
    }
}

fn or_unknown(value: &Option<String>) -> String {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_LOCATION)
        .to_string()
}
