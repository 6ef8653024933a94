use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub analytics: AnalyticsConfig,
    pub cache: CacheConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only
    None,
    /// Honour `Forwarded` / `X-Forwarded-For`
    Standard,
    /// Honour `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Path to a MaxMind GeoLite2-City / GeoIP2-City database.
    /// When unset every location resolves to "Unknown".
    pub geoip_city_db_path: Option<String>,
    pub trusted_proxy_mode: TrustedProxyMode,
    /// Proxies whose addresses are skipped (right to left) in X-Forwarded-For
    pub trusted_proxies: Vec<IpNet>,
    /// Fixed number of proxy hops to skip in X-Forwarded-For; wins over `trusted_proxies`
    pub num_trusted_proxies: Option<usize>,
    /// How many calendar days of salts and seen fingerprints are retained
    pub salt_retention_days: u32,
    pub purge_interval_secs: u64,
    /// Upper bound on each storage call made while ingesting a beacon
    pub external_call_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub site_max_entries: u64,
    pub site_ttl_secs: u64,
    /// Lifetime of a cached "domain not registered" answer
    pub site_miss_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub top_limit: i64,
    pub live_window_secs: i64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            geoip_city_db_path: None,
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
            salt_retention_days: 2,
            purge_interval_secs: 3600,
            external_call_timeout_ms: 2000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            site_max_entries: 10_000,
            site_ttl_secs: 60,
            site_miss_ttl_secs: 5,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            top_limit: 10,
            live_window_secs: 300,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn parse_trusted_proxies(raw: &str) -> anyhow::Result<Vec<IpNet>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            // Bare addresses are accepted as single-host networks
            s.parse::<IpNet>()
                .or_else(|_| s.parse::<std::net::IpAddr>().map(IpNet::from))
                .with_context(|| format!("TRUSTED_PROXIES contains an invalid entry: '{s}'"))
        })
        .collect()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./wren.db".to_string());
        let max_connections = env_or("DATABASE_MAX_CONNECTIONS", 30u32)?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = env_or("API_PORT", 8080u16)?;

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = match std::env::var("TRUSTED_PROXIES") {
            Ok(raw) => parse_trusted_proxies(&raw)?,
            Err(_) => vec![],
        };

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .map(|v| v.trim().parse::<usize>())
            .transpose()
            .context("NUM_TRUSTED_PROXIES must be a non-negative integer")?;

        let defaults = AnalyticsConfig::default();
        let salt_retention_days = env_or("SALT_RETENTION_DAYS", defaults.salt_retention_days)?;
        if salt_retention_days == 0 {
            anyhow::bail!("SALT_RETENTION_DAYS must be at least 1");
        }

        let analytics = AnalyticsConfig {
            geoip_city_db_path: std::env::var("GEOIP_CITY_DB_PATH").ok(),
            trusted_proxy_mode,
            trusted_proxies,
            num_trusted_proxies,
            salt_retention_days,
            purge_interval_secs: env_or("PURGE_INTERVAL_SECS", defaults.purge_interval_secs)?,
            external_call_timeout_ms: env_or(
                "EXTERNAL_CALL_TIMEOUT_MS",
                defaults.external_call_timeout_ms,
            )?,
        };

        let cache_defaults = CacheConfig::default();
        let dashboard_defaults = DashboardConfig::default();

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            analytics,
            cache: CacheConfig {
                site_max_entries: env_or("SITE_CACHE_MAX_ENTRIES", cache_defaults.site_max_entries)?,
                site_ttl_secs: env_or("SITE_CACHE_TTL_SECS", cache_defaults.site_ttl_secs)?,
                site_miss_ttl_secs: env_or(
                    "SITE_CACHE_MISS_TTL_SECS",
                    cache_defaults.site_miss_ttl_secs,
                )?,
            },
            dashboard: DashboardConfig {
                top_limit: env_or("DASHBOARD_TOP_LIMIT", dashboard_defaults.top_limit)?,
                live_window_secs: env_or(
                    "LIVE_WINDOW_SECS",
                    dashboard_defaults.live_window_secs,
                )?,
            },
        })
    }
}
