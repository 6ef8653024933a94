use chrono::{DateTime, Utc};

/// Source of "now" for the ingestion path; swapped out in tests to cross day
/// boundaries deterministically
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
