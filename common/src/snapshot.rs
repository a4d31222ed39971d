use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::FetchError;
use crate::keys::FetchKey;
use crate::records::SourcePayload;

/// Immutable read of one cache entry at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct SourceSnapshot {
    pub key: FetchKey,
    /// Last successfully fetched payload; retained across failed refreshes
    pub payload: Option<Arc<SourcePayload>>,
    /// When the request that produced `payload` was issued
    pub fetched_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub last_error: Option<FetchError>,
    pub in_flight: bool,
    pub read_at: DateTime<Utc>,
}

impl SourceSnapshot {
    /// Snapshot for a key the cache has never seen
    pub fn empty(key: FetchKey, read_at: DateTime<Utc>) -> Self {
        Self {
            key,
            payload: None,
            fetched_at: None,
            is_stale: true,
            last_error: None,
            in_flight: false,
            read_at,
        }
    }

    pub fn has_value(&self) -> bool {
        self.payload.is_some()
    }

    /// Seconds since the value was fetched
    pub fn age_secs(&self) -> Option<i64> {
        self.fetched_at
            .map(|at| (self.read_at - at).num_seconds().max(0))
    }
}
