//! GeoIP lookup service using MaxMind GeoLite2/GeoIP2 MMDB
//!
//! This module provides thread-safe IP geolocation using memory-mapped
//! MaxMind City databases.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

use crate::analytics::models::GeoLocation;

/// IP → location resolver used by the ingestion path
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> GeoLocation;
}

/// Resolver used when no database is configured; everything is unknown
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGeo;

impl GeoLookup for NoopGeo {
    fn lookup(&self, _ip: IpAddr) -> GeoLocation {
        GeoLocation::default()
    }
}

/// GeoIP lookup backed by a MaxMind City database
#[derive(Clone)]
pub struct MaxMindGeo {
    city_reader: Arc<Reader<Mmap>>,
}

impl MaxMindGeo {
    /// Memory-map the GeoLite2-City or GeoIP2-City .mmdb file at `city_path`
    pub fn open(city_path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(city_path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", city_path))?;

        Ok(Self {
            city_reader: Arc::new(reader),
        })
    }

    fn extract_from_city(city: &geoip2::City, geo_location: &mut GeoLocation) {
        geo_location.country = city.country.names.english.map(|s| s.to_string());

        if let Some(subdivision) = city.subdivisions.first() {
            geo_location.region = subdivision.names.english.map(|s| s.to_string());
        }

        geo_location.city = city.city.names.english.map(|s| s.to_string());
    }
}

impl GeoLookup for MaxMindGeo {
    fn lookup(&self, ip: IpAddr) -> GeoLocation {
        let mut geo_location = GeoLocation::default();

        if let Ok(result) = self.city_reader.lookup(ip) {
            if let Ok(Some(city)) = result.decode::<geoip2::City>() {
                Self::extract_from_city(&city, &mut geo_location);
            } else if let Ok(Some(country)) = result.decode::<geoip2::Country>() {
                // Country-only databases carry no subdivision or city data
                geo_location.country = country.country.names.english.map(|s| s.to_string());
            }
        }

        geo_location
    }
}

/// Open the configured database, or fall back to [`NoopGeo`] when none is set
pub fn from_config(city_path: Option<&str>) -> Result<Arc<dyn GeoLookup>> {
    match city_path {
        Some(path) => Ok(Arc::new(MaxMindGeo::open(path)?)),
        None => Ok(Arc::new(NoopGeo)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geoip_open_invalid_path() {
        assert!(MaxMindGeo::open("/nonexistent/path.mmdb").is_err());
        assert!(from_config(Some("/nonexistent/path.mmdb")).is_err());
    }

    #[test]
    fn test_noop_geo_is_unknown() {
        let geo = from_config(None).unwrap();
        let location = geo.lookup("8.8.8.8".parse().unwrap());
        assert_eq!(location.country_or_unknown(), "Unknown");
        assert_eq!(location.region_or_unknown(), "Unknown");
        assert_eq!(location.city_or_unknown(), "Unknown");
    }
}
