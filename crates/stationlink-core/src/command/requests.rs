// ── Typed request structs for Command payloads ──

use serde::{Deserialize, Serialize};
use stationlink_api::StationId;

// ── Production map ─────────────────────────────────────────────────

/// Start a production order on a station.
///
/// ```rust,ignore
/// let request = StartProductionRequest::new(station, 90, 7).quantity(500).color(3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartProductionRequest {
    pub station: StationId,
    pub map: u64,
    pub product: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_item: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub die: Option<u64>,
    /// Planned quantity; 0 lets the server use the map's own target.
    pub quantity: u64,
}

impl StartProductionRequest {
    pub fn new(station: StationId, map: u64, product: u64) -> Self {
        Self {
            station,
            map,
            product,
            map_item: None,
            color: None,
            die: None,
            quantity: 0,
        }
    }

    pub fn quantity(mut self, quantity: u64) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn map_item(mut self, item: u64) -> Self {
        self.map_item = Some(item);
        self
    }

    pub fn color(mut self, color: u64) -> Self {
        self.color = Some(color);
        self
    }

    pub fn die(mut self, die: u64) -> Self {
        self.die = Some(die);
        self
    }
}
