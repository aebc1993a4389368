// ── Inbound routing ──
//
// Turns one decoded frame into the ordered list of (kind, event) pairs
// listeners receive. Pure; the manager applies `disable_reconnect`.
//
// Precedence:
//   1. acknowledgements (`success` present), with narrower re-dispatch of
//      session and machine payloads and reclassification of two rejections
//   2. `connection`, `machine_update`, `production_alert`
//   3. anything else under its own `type`
// Every frame is also delivered under `EventKind::Message`, last.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use stationlink_api::{Acknowledgement, InboundMessage, MachineData, Rejection};
use tracing::{debug, warn};

use crate::event::{ConnectionStatus, EventKind, StationEvent};

/// Acknowledgement message substituted for an already-active session.
pub(crate) const SESSION_ALREADY_ACTIVE: &str = "Sessão já estava ativa";

#[derive(Debug, Default)]
pub(crate) struct Routed {
    pub events: Vec<(EventKind, StationEvent)>,
    /// The server does not know the addressed machine.
    pub disable_reconnect: bool,
}

impl Routed {
    fn push(&mut self, kind: EventKind, event: StationEvent) {
        self.events.push((kind, event));
    }
}

pub(crate) fn route(message: InboundMessage) -> Routed {
    let mut routed = Routed::default();

    match &message {
        InboundMessage::Ack(ack) => route_ack(ack, &mut routed),
        InboundMessage::Connection(notice) => routed.push(
            EventKind::Connection,
            StationEvent::Connection(ConnectionStatus {
                connected: true,
                error: None,
                notice: Some(notice.clone()),
            }),
        ),
        InboundMessage::MachineUpdate(update) => {
            let update = Arc::new(update.clone());
            routed.push(
                EventKind::MachineUpdate,
                StationEvent::MachineUpdate(Arc::clone(&update)),
            );
            if let Some(kind) = update.update_type.clone() {
                routed.push(
                    EventKind::MachineUpdateOf(kind),
                    StationEvent::MachineUpdate(update),
                );
            }
        }
        InboundMessage::ProductionAlert(alert) => routed.push(
            EventKind::ProductionAlert,
            StationEvent::ProductionAlert(Arc::new(alert.clone())),
        ),
        InboundMessage::Other { kind, .. } => {
            let kind = EventKind::Other(kind.clone());
            routed.push(kind, StationEvent::Message(Arc::new(message.clone())));
        }
        InboundMessage::Untyped(_) => {}
    }

    routed.push(EventKind::Message, StationEvent::Message(Arc::new(message)));
    routed
}

fn route_ack(ack: &Acknowledgement, routed: &mut Routed) {
    match ack.rejection() {
        None => {
            if let Some(data) = ack.data.as_ref().filter(|d| d.is_object()) {
                if data.get("has_active_session").is_some() || data.get("sessao").is_some() {
                    debug!("acknowledgement carries session status");
                    routed.push(
                        EventKind::SessionStatus,
                        StationEvent::SessionStatus(Arc::new(data.clone())),
                    );
                }
                if let Some(machine) = machine_snapshot(data) {
                    debug!("acknowledgement carries machine data");
                    routed.push(
                        EventKind::MachineSnapshot,
                        StationEvent::MachineSnapshot(Arc::new(machine)),
                    );
                }
            }
            routed.push(
                EventKind::CommandSuccess,
                StationEvent::CommandSuccess(Arc::new(ack.clone())),
            );
        }
        Some(Rejection::SessionAlreadyActive) => {
            debug!("session already active, treating as success");
            let ack = Arc::new(ack.clone());
            routed.push(
                EventKind::SessionAlreadyActive,
                StationEvent::SessionAlreadyActive(ack),
            );
            routed.push(
                EventKind::CommandSuccess,
                StationEvent::CommandSuccess(Arc::new(Acknowledgement::ok(
                    SESSION_ALREADY_ACTIVE,
                ))),
            );
        }
        Some(Rejection::MachineNotFound) => {
            warn!(error = ack.text(), "server does not know this machine");
            let ack = Arc::new(ack.clone());
            routed.disable_reconnect = true;
            routed.push(
                EventKind::MachineNotFound,
                StationEvent::MachineNotFound(Arc::clone(&ack)),
            );
            routed.push(EventKind::CommandError, StationEvent::CommandError(ack));
        }
        Some(Rejection::Other) => {
            warn!(error = ack.text(), "command failed");
            routed.push(
                EventKind::CommandError,
                StationEvent::CommandError(Arc::new(ack.clone())),
            );
        }
    }
}

/// Machine data in an acknowledgement is either nested under
/// `machine_data` or is the payload itself (recognized by `id`).
fn machine_snapshot(data: &Value) -> Option<MachineData> {
    let body = match data.get("machine_data") {
        Some(nested) => nested,
        None if data.get("id").is_some() => data,
        None => return None,
    };
    match MachineData::deserialize(body) {
        Ok(machine) => Some(machine),
        Err(e) => {
            warn!(error = %e, "acknowledgement machine data did not decode");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use stationlink_api::{StationId, UpdateType};

    use super::*;

    fn kinds(value: Value) -> (Vec<String>, Routed) {
        let routed = route(InboundMessage::from_value(value).unwrap());
        let kinds = routed.events.iter().map(|(k, _)| k.to_string()).collect();
        (kinds, routed)
    }

    #[test]
    fn plain_success() {
        let (kinds, routed) = kinds(json!({"success": true, "message": "ok"}));
        assert_eq!(kinds, ["command_success", "message"]);
        assert!(!routed.disable_reconnect);
    }

    #[test]
    fn success_with_session_and_machine_payload() {
        let (kinds, routed) = kinds(json!({
            "success": true,
            "data": {
                "has_active_session": true,
                "machine_data": { "id": 8, "nome": "Prensa 2" }
            }
        }));
        assert_eq!(kinds, ["session_status", "machine_data", "command_success", "message"]);

        let StationEvent::MachineSnapshot(machine) = &routed.events[1].1 else {
            panic!("expected machine snapshot");
        };
        assert_eq!(machine.id, Some(StationId::new(8)));
        assert_eq!(machine.name.as_deref(), Some("Prensa 2"));
    }

    #[test]
    fn already_active_session_is_success() {
        let (kinds, routed) = kinds(json!({
            "success": false,
            "error": "Já existe sessão ativa para esta máquina"
        }));
        assert_eq!(kinds, ["session_already_active", "command_success", "message"]);
        assert!(!routed.disable_reconnect);

        let StationEvent::CommandSuccess(ack) = &routed.events[1].1 else {
            panic!("expected command success");
        };
        assert!(ack.success);
        assert_eq!(ack.text(), SESSION_ALREADY_ACTIVE);
    }

    #[test]
    fn machine_not_found_disables_reconnect() {
        let (kinds, routed) = kinds(json!({
            "success": false,
            "error": "Máquina 77 não encontrada"
        }));
        assert_eq!(kinds, ["machine_not_found", "command_error", "message"]);
        assert!(routed.disable_reconnect);
    }

    #[test]
    fn machine_update_also_routes_by_update_type() {
        let (kinds, _) = kinds(json!({
            "type": "machine_update",
            "update_type": "parada",
            "target_machine_id": 3
        }));
        assert_eq!(kinds, ["machine_update", "machine_update_parada", "message"]);

        let routed = route(
            InboundMessage::from_value(json!({
                "type": "machine_update",
                "update_type": "velocidade",
                "target_machine_id": 3
            }))
            .unwrap(),
        );
        assert_eq!(routed.events[1].0, EventKind::MachineUpdateOf(UpdateType::Speed));
    }

    #[test]
    fn unknown_type_routes_under_its_own_name() {
        let (kinds, _) = kinds(json!({"type": "heartbeat"}));
        assert_eq!(kinds, ["heartbeat", "message"]);

        let (kinds, _) = self::kinds(json!({"note": "no type"}));
        assert_eq!(kinds, ["message"]);
    }

    #[test]
    fn connection_notice_reports_connected() {
        let (_, routed) = kinds(json!({"type": "connection", "message": "bem-vindo"}));
        let StationEvent::Connection(status) = &routed.events[0].1 else {
            panic!("expected connection status");
        };
        assert!(status.connected);
        assert_eq!(
            status.notice.as_ref().and_then(|n| n.message.as_deref()),
            Some("bem-vindo")
        );
    }
}
