// ── Cache entries ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stationlink_api::{MachineUpdate, ProductionAlert, StationId};

/// Last-known counters of one station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationRecord {
    pub id: StationId,
    pub name: String,
    pub signals: u64,
    pub rejects: u64,
    pub valid_signals: u64,
    pub elapsed_secs: u64,
    pub stopped_secs: u64,
    pub valid_secs: u64,
    /// Set for stations of a multi-station machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<StationId>,
    pub last_update: DateTime<Utc>,
}

/// A partial write: `Some` fields replace stored values, `None` keeps them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationUpdate {
    pub id: StationId,
    pub name: Option<String>,
    pub signals: Option<u64>,
    pub rejects: Option<u64>,
    pub valid_signals: Option<u64>,
    pub elapsed_secs: Option<u64>,
    pub stopped_secs: Option<u64>,
    pub valid_secs: Option<u64>,
    pub parent: Option<StationId>,
}

impl StationUpdate {
    pub fn new(id: StationId) -> Self {
        Self {
            id,
            name: None,
            signals: None,
            rejects: None,
            valid_signals: None,
            elapsed_secs: None,
            stopped_secs: None,
            valid_secs: None,
            parent: None,
        }
    }

    /// Derive an update from the operator-session counters of a
    /// `machine_update`. `None` when the message carries no session.
    pub fn from_machine_update(update: &MachineUpdate) -> Option<Self> {
        let session = update.machine_data.operator_session.as_ref()?;
        let id = update.station_id();

        Some(Self {
            id,
            name: Some(
                update
                    .machine_data
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Station {id}")),
            ),
            signals: Some(session.signals),
            rejects: Some(session.rejects),
            valid_signals: Some(session.valid_signals),
            elapsed_secs: Some(session.elapsed_secs),
            stopped_secs: Some(session.stopped_secs),
            valid_secs: Some(session.valid_secs),
            parent: (id != update.target_machine_id).then_some(update.target_machine_id),
        })
    }

    pub(crate) fn merge_into(self, existing: Option<&StationRecord>, now: DateTime<Utc>) -> StationRecord {
        let id = self.id;
        let base = existing.cloned().unwrap_or_else(|| StationRecord {
            id,
            name: format!("Station {id}"),
            signals: 0,
            rejects: 0,
            valid_signals: 0,
            elapsed_secs: 0,
            stopped_secs: 0,
            valid_secs: 0,
            parent: None,
            last_update: now,
        });

        StationRecord {
            id,
            name: self.name.unwrap_or(base.name),
            signals: self.signals.unwrap_or(base.signals),
            rejects: self.rejects.unwrap_or(base.rejects),
            valid_signals: self.valid_signals.unwrap_or(base.valid_signals),
            elapsed_secs: self.elapsed_secs.unwrap_or(base.elapsed_secs),
            stopped_secs: self.stopped_secs.unwrap_or(base.stopped_secs),
            valid_secs: self.valid_secs.unwrap_or(base.valid_secs),
            parent: self.parent.or(base.parent),
            last_update: now,
        }
    }
}

/// A received subscription event, kept for inspection only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// `machine_update` or `production_alert`.
    pub kind: String,
    pub target: StationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<StationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<Value>,
    /// Server time, unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    pub received_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn from_update(update: &MachineUpdate, received_at: DateTime<Utc>) -> Self {
        Self {
            kind: "machine_update".into(),
            target: update.target_machine_id,
            source: update.source_machine_id,
            detail: update.update_type.as_ref().map(|t| t.as_str().to_owned()),
            payload: serde_json::to_value(&update.machine_data).ok(),
            additional_data: update.additional_data.clone(),
            timestamp: update.timestamp,
            received_at,
        }
    }

    pub fn from_alert(alert: &ProductionAlert, received_at: DateTime<Utc>) -> Self {
        Self {
            kind: "production_alert".into(),
            target: alert.target_machine_id,
            source: alert.source_machine_id,
            detail: Some(alert.alert_type.clone()),
            payload: Some(alert.alert_data.clone()),
            additional_data: None,
            timestamp: alert.timestamp,
            received_at,
        }
    }

    /// `true` when `station` is the target or the source.
    pub fn involves(&self, station: StationId) -> bool {
        self.target == station || self.source == Some(station)
    }
}
