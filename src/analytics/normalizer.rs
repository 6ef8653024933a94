//! Beacon → structured dimensions

use thiserror::Error;
use url::Url;

use crate::analytics::user_agent::{resolve_device_type, UaFlags};
use crate::models::{Beacon, DeviceType};

/// Referrer label for visits without a referrer
pub const DIRECT_REFERRER: &str = "Direct";

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid page url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("page url '{0}' has no host")]
    MissingHost(String),
    #[error("invalid referrer '{referrer}': {source}")]
    InvalidReferrer {
        referrer: String,
        #[source]
        source: url::ParseError,
    },
    #[error("referrer '{0}' has no host")]
    ReferrerWithoutHost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDimensions {
    /// Hostname of the visited page; the join key against registered sites
    pub domain: String,
    pub url: String,
    pub pathname: String,
    pub referrer: String,
    pub device_type: DeviceType,
    pub os: String,
    pub browser: String,
}

pub fn normalize(beacon: &Beacon) -> Result<NormalizedDimensions, ValidationError> {
    let page = Url::parse(beacon.url.trim()).map_err(|source| ValidationError::InvalidUrl {
        url: beacon.url.clone(),
        source,
    })?;
    let domain = page
        .host_str()
        .filter(|h| !h.is_empty())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| ValidationError::MissingHost(beacon.url.clone()))?;

    let referrer = normalize_referrer(beacon.referrer.as_deref())?;

    let pathname = if beacon.pathname.trim().is_empty() {
        page.path().to_string()
    } else {
        beacon.pathname.trim().to_string()
    };

    let flags = UaFlags::parse(&beacon.user_agent);

    Ok(NormalizedDimensions {
        domain,
        url: page.to_string(),
        pathname,
        referrer,
        device_type: resolve_device_type(&flags),
        os: flags.os,
        browser: flags.browser,
    })
}

/// `host[:port] + path` of the referrer, or "Direct" when there is none.
/// The root path is dropped, so `https://google.com/` becomes `google.com`.
pub fn normalize_referrer(raw: Option<&str>) -> Result<String, ValidationError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Ok(DIRECT_REFERRER.to_string());
    }

    let parsed = Url::parse(raw).map_err(|source| ValidationError::InvalidReferrer {
        referrer: raw.to_string(),
        source,
    })?;

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ValidationError::ReferrerWithoutHost(raw.to_string()))?;

    let mut normalized = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    if parsed.path() != "/" {
        normalized.push_str(parsed.path());
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(url: &str, referrer: Option<&str>) -> Beacon {
        serde_json::from_value(serde_json::json!({
            "url": url,
            "referrer": referrer,
            "pathname": "/pricing",
            "userAgent": "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
            "language": "en-US"
        }))
        .unwrap()
    }

    #[test]
    fn test_empty_referrer_is_direct() {
        let dims = normalize(&beacon("https://example.com/pricing", Some(""))).unwrap();
        assert_eq!(dims.referrer, "Direct");
        assert_eq!(dims.domain, "example.com");
        assert_eq!(dims.pathname, "/pricing");

        let dims = normalize(&beacon("https://example.com/pricing", None)).unwrap();
        assert_eq!(dims.referrer, "Direct");
    }

    #[test]
    fn test_referrer_drops_scheme_and_query() {
        assert_eq!(
            normalize_referrer(Some("https://t.co/abc?x=1")).unwrap(),
            "t.co/abc"
        );
        assert_eq!(
            normalize_referrer(Some("http://news.ycombinator.com/item#top")).unwrap(),
            "news.ycombinator.com/item"
        );
        assert_eq!(normalize_referrer(Some("https://www.google.com/")).unwrap(), "www.google.com");
        assert_eq!(
            normalize_referrer(Some("http://localhost:3000/docs")).unwrap(),
            "localhost:3000/docs"
        );
    }

    #[test]
    fn test_unparseable_referrer_is_rejected() {
        let err = normalize(&beacon("https://example.com/", Some("not a url"))).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidReferrer { .. }));
    }

    #[test]
    fn test_unparseable_page_url_is_rejected() {
        let err = normalize(&beacon("/relative/only", None)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUrl { .. }));

        let err = normalize(&beacon("mailto:someone@example.com", None)).unwrap_err();
        assert!(matches!(err, ValidationError::MissingHost(_)));
    }

    #[test]
    fn test_domain_strips_scheme_port_path_and_case() {
        let dims = normalize(&beacon("https://Blog.Example.COM:8443/a/b?c=d", None)).unwrap();
        assert_eq!(dims.domain, "blog.example.com");
    }

    #[test]
    fn test_pathname_falls_back_to_url_path() {
        let mut b = beacon("https://example.com/docs/intro?x=1", None);
        b.pathname = String::new();
        assert_eq!(normalize(&b).unwrap().pathname, "/docs/intro");
    }

    #[test]
    fn test_device_dimensions_come_from_user_agent() {
        let dims = normalize(&beacon("https://example.com/", None)).unwrap();
        assert_eq!(dims.device_type, DeviceType::Desktop);
        assert_eq!(dims.browser, "Chrome");
    }
}
