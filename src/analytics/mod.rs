//! Privacy-preserving visit analytics
//!
//! Ingestion (normalization, daily-salted fingerprints, atomic dedup, GeoIP)
//! and the dashboard-side series formatting.

pub mod clock;
pub mod dedup;
pub mod fingerprint;
pub mod geoip;
pub mod ingest;
pub mod ip_extractor;
pub mod models;
pub mod normalizer;
pub mod retention;
pub mod salt;
pub mod series;
pub mod storage;
pub mod user_agent;

pub use clock::{Clock, SystemClock};
pub use dedup::DedupGate;
pub use geoip::{GeoLookup, MaxMindGeo, NoopGeo};
pub use ingest::{IngestError, IngestService};
pub use ip_extractor::extract_client_ip;
pub use models::GeoLocation;
pub use normalizer::ValidationError;
pub use retention::RetentionTask;
pub use salt::SaltRotator;
pub use series::{FormatError, Granularity, SeriesPoint};
pub use storage::{Dimension, DimensionCount, SeriesRow, TimeRange};
