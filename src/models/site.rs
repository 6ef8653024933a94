use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A website registered to send beacons, keyed by its hostname
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Site {
    pub id: i64,
    pub domain: String,
    pub created_at: i64,
}
