// ── Command API ──
//
// Every operator intent flows through the `Command` enum. The connection
// manager encodes it into the server's wire vocabulary and sends it;
// acknowledgements come back later as events, never as return values.

pub mod requests;

use stationlink_api::{StationId, WireCommand};

pub use requests::StartProductionRequest;

/// All operator-facing commands the telemetry server understands.
///
/// Subscription changes are not commands; use
/// [`ConnectionManager::subscribe`](crate::ConnectionManager::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // ── Operator session ─────────────────────────────────────────────
    StartOperatorSession {
        station: StationId,
        operator: u64,
        shift: u64,
        /// Resume this session instead of opening a new one.
        session: Option<u64>,
    },
    EndOperatorSession { station: StationId },
    QuerySession { station: StationId },

    // ── Production map ───────────────────────────────────────────────
    StartProduction(StartProductionRequest),
    FinishProductionPartial { station: StationId },
    FinishProductionComplete { station: StationId },
    QueryProductionMap { station: StationId },

    // ── Machine ──────────────────────────────────────────────────────
    QueryMachine { station: StationId },
    /// Add one reject to the station's counters.
    AddRejects { station: StationId },
    AssignStopReason { stop_id: u64, reason_id: u64 },
}

impl Command {
    /// The station this command addresses, if any.
    pub fn station(&self) -> Option<StationId> {
        match self {
            Self::StartOperatorSession { station, .. }
            | Self::EndOperatorSession { station }
            | Self::QuerySession { station }
            | Self::FinishProductionPartial { station }
            | Self::FinishProductionComplete { station }
            | Self::QueryProductionMap { station }
            | Self::QueryMachine { station }
            | Self::AddRejects { station } => Some(*station),
            Self::StartProduction(req) => Some(req.station),
            Self::AssignStopReason { .. } => None,
        }
    }

    /// The wire `type` this command is sent as.
    pub fn name(&self) -> &'static str {
        WireCommand::from(self.clone()).name()
    }
}

impl From<Command> for WireCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::StartOperatorSession {
                station,
                operator,
                shift,
                session,
            } => WireCommand::StartOperatorSession {
                station,
                operator,
                shift,
                session,
            },
            Command::EndOperatorSession { station } => WireCommand::EndOperatorSession { station },
            Command::QuerySession { station } => WireCommand::QuerySession { station },
            Command::StartProduction(req) => WireCommand::StartProductionMap {
                station: req.station,
                map: req.map,
                product: req.product,
                map_item: req.map_item,
                color: req.color,
                die: req.die,
                quantity: req.quantity,
            },
            Command::FinishProductionPartial { station } => {
                WireCommand::FinishProductionMapPartial { station }
            }
            Command::FinishProductionComplete { station } => {
                WireCommand::FinishProductionMapComplete { station }
            }
            Command::QueryProductionMap { station } => WireCommand::QueryProductionMap { station },
            Command::QueryMachine { station } => WireCommand::QueryMachine { station },
            Command::AddRejects { station } => WireCommand::AddRejects { station },
            Command::AssignStopReason { stop_id, reason_id } => WireCommand::AssignStopReason {
                stop: stop_id,
                reason: reason_id,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn production_request_builds_wire_command() {
        let station = StationId::new(14);
        let command = Command::StartProduction(
            StartProductionRequest::new(station, 90, 7)
                .quantity(500)
                .die(11),
        );
        assert_eq!(command.station(), Some(station));

        let wire = WireCommand::from(command);
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            json!({
                "type": "iniciar_producao_mapa",
                "id_maquina": 14,
                "id_mapa": 90,
                "id_produto": 7,
                "id_matriz": 11,
                "qt_produzir": 500
            })
        );
    }

    #[test]
    fn stop_reason_maps_ids() {
        let wire = WireCommand::from(Command::AssignStopReason {
            stop_id: 301,
            reason_id: 4,
        });
        assert_eq!(wire, WireCommand::AssignStopReason { stop: 301, reason: 4 });
    }
}
