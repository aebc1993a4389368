// ── Live-vs-fallback station rows ──
//
// Station widgets show cached realtime counters when they are fresh and
// fall back to rows from the non-realtime data path otherwise. Each row
// says where it came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stationlink_api::StationId;

use super::record::StationRecord;

/// A station row from the non-realtime data path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackStation {
    pub id: StationId,
    pub name: String,
    pub produced: u64,
    pub rejects: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Fresh counters from the realtime link.
    Live,
    /// Caller-supplied data, already considered stale.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStation {
    pub id: StationId,
    pub name: String,
    pub signals: u64,
    pub rejects: u64,
    pub valid_signals: u64,
    pub elapsed_secs: u64,
    pub last_update: DateTime<Utc>,
    pub source: DataSource,
}

impl From<StationRecord> for LocalStation {
    fn from(record: StationRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            signals: record.signals,
            rejects: record.rejects,
            valid_signals: record.valid_signals,
            elapsed_secs: record.elapsed_secs,
            last_update: record.last_update,
            source: DataSource::Live,
        }
    }
}

impl LocalStation {
    /// Fallback rows have no reject breakdown, so everything produced
    /// counts as valid.
    pub(crate) fn from_fallback(row: &FallbackStation, stamped: DateTime<Utc>) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            signals: row.produced,
            rejects: row.rejects,
            valid_signals: row.produced,
            elapsed_secs: 0,
            last_update: stamped,
            source: DataSource::Fallback,
        }
    }
}
