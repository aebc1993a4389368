//! Wire protocol spoken with the production telemetry server.
//!
//! Outbound traffic is a flat JSON command envelope tagged by `type`
//! (`{"type": "subscribe", "id_maquina": 7}`). Inbound traffic is one of
//! three shapes that share no common tag, so classification happens on a
//! [`serde_json::Value`] first (see [`InboundMessage::from_value`]):
//!
//! - acknowledgements carry a boolean `success`
//! - connection notices carry `type: "connection"`
//! - subscription events carry `type: "machine_update" | "production_alert"`
//!
//! Field names on the wire are the server's; Rust names are English and
//! mapped with `#[serde(rename)]`.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

// ── StationId ────────────────────────────────────────────────────────

/// Identifier of a machine or of one station of a multi-station machine.
///
/// The server uses one id space for both; a station forwarded through its
/// parent shows up as `source_machine_id` with the parent as target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(u64);

impl StationId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for StationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StationId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

// ── Outbound commands ────────────────────────────────────────────────

/// A command sent to the telemetry server.
///
/// Serializes to the server's envelope: the variant name becomes `type`,
/// fields are flattened next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireCommand {
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "id_maquina")]
        station: StationId,
    },

    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(rename = "id_maquina")]
        station: StationId,
    },

    #[serde(rename = "iniciar_sessao_operador")]
    StartOperatorSession {
        #[serde(rename = "id_maquina")]
        station: StationId,
        #[serde(rename = "id_operador")]
        operator: u64,
        #[serde(rename = "id_turno")]
        shift: u64,
        /// Existing session to resume, if any.
        #[serde(rename = "id_sessao", default, skip_serializing_if = "Option::is_none")]
        session: Option<u64>,
    },

    #[serde(rename = "finalizar_sessao_operador")]
    EndOperatorSession {
        #[serde(rename = "id_maquina")]
        station: StationId,
    },

    #[serde(rename = "iniciar_producao_mapa")]
    StartProductionMap {
        #[serde(rename = "id_maquina")]
        station: StationId,
        #[serde(rename = "id_mapa")]
        map: u64,
        #[serde(rename = "id_produto")]
        product: u64,
        #[serde(rename = "id_item_mapa", default, skip_serializing_if = "Option::is_none")]
        map_item: Option<u64>,
        #[serde(rename = "id_cor", default, skip_serializing_if = "Option::is_none")]
        color: Option<u64>,
        #[serde(rename = "id_matriz", default, skip_serializing_if = "Option::is_none")]
        die: Option<u64>,
        #[serde(rename = "qt_produzir", default)]
        quantity: u64,
    },

    #[serde(rename = "finalizar_producao_mapa_parcial")]
    FinishProductionMapPartial {
        #[serde(rename = "id_maquina")]
        station: StationId,
    },

    #[serde(rename = "finalizar_producao_mapa_completa")]
    FinishProductionMapComplete {
        #[serde(rename = "id_maquina")]
        station: StationId,
    },

    #[serde(rename = "adicionar_rejeitos")]
    AddRejects {
        #[serde(rename = "id_maquina")]
        station: StationId,
    },

    #[serde(rename = "consultar_maquina")]
    QueryMachine {
        #[serde(rename = "id_maquina")]
        station: StationId,
    },

    #[serde(rename = "consultar_sessao")]
    QuerySession {
        #[serde(rename = "id_maquina")]
        station: StationId,
    },

    #[serde(rename = "consultar_producao_mapa")]
    QueryProductionMap {
        #[serde(rename = "id_maquina")]
        station: StationId,
    },

    #[serde(rename = "atribuir_motivo_parada")]
    AssignStopReason {
        #[serde(rename = "id_parada")]
        stop: u64,
        #[serde(rename = "id_motivo")]
        reason: u64,
    },
}

impl WireCommand {
    /// The `type` discriminant as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::StartOperatorSession { .. } => "iniciar_sessao_operador",
            Self::EndOperatorSession { .. } => "finalizar_sessao_operador",
            Self::StartProductionMap { .. } => "iniciar_producao_mapa",
            Self::FinishProductionMapPartial { .. } => "finalizar_producao_mapa_parcial",
            Self::FinishProductionMapComplete { .. } => "finalizar_producao_mapa_completa",
            Self::AddRejects { .. } => "adicionar_rejeitos",
            Self::QueryMachine { .. } => "consultar_maquina",
            Self::QuerySession { .. } => "consultar_sessao",
            Self::QueryProductionMap { .. } => "consultar_producao_mapa",
            Self::AssignStopReason { .. } => "atribuir_motivo_parada",
        }
    }

    /// The station the command addresses. Stop justification is keyed by
    /// stop id only.
    pub fn station(&self) -> Option<StationId> {
        match self {
            Self::Subscribe { station }
            | Self::Unsubscribe { station }
            | Self::StartOperatorSession { station, .. }
            | Self::EndOperatorSession { station }
            | Self::StartProductionMap { station, .. }
            | Self::FinishProductionMapPartial { station }
            | Self::FinishProductionMapComplete { station }
            | Self::AddRejects { station }
            | Self::QueryMachine { station }
            | Self::QuerySession { station }
            | Self::QueryProductionMap { station } => Some(*station),
            Self::AssignStopReason { .. } => None,
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Inbound: acknowledgements ────────────────────────────────────────

/// Response to a command: `{success, message | error, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Structured error kind, when the server sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

/// Server rejections that callers treat differently from a plain failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A session start hit an already running session.
    SessionAlreadyActive,
    /// The addressed machine does not exist on the server.
    MachineNotFound,
    Other,
}

impl Acknowledgement {
    /// Successful acknowledgement with a message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            code: None,
            data: None,
            timestamp: None,
        }
    }

    /// Human-readable text: the error for failures, the message otherwise.
    pub fn text(&self) -> &str {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("")
    }

    /// Classify a failed acknowledgement. `None` for successes.
    ///
    /// The structured `code` wins when present; otherwise the message text
    /// is matched, which is only as stable as the server's wording.
    pub fn rejection(&self) -> Option<Rejection> {
        if self.success {
            return None;
        }

        if let Some(code) = self.code.as_deref() {
            return Some(match code {
                "session_already_active" => Rejection::SessionAlreadyActive,
                "machine_not_found" => Rejection::MachineNotFound,
                _ => Rejection::Other,
            });
        }

        let text = self.text().to_lowercase();
        let kind = if text.contains("já existe sessão ativa") || text.contains("session already active")
        {
            Rejection::SessionAlreadyActive
        } else if (text.contains("máquina") && text.contains("não encontrada"))
            || text.contains("machine not found")
        {
            Rejection::MachineNotFound
        } else {
            Rejection::Other
        };
        Some(kind)
    }
}

// ── Inbound: connection notice ───────────────────────────────────────

/// Greeting the server sends right after the socket opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionNotice {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub server_time: Option<f64>,
}

// ── Inbound: subscription events ─────────────────────────────────────

/// Discriminant of a `machine_update` event.
///
/// Unknown values are preserved in [`UpdateType::Other`] so new server
/// event kinds still reach composite-key subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpdateType {
    /// A production signal (`sinal`).
    Signal,
    /// The machine stopped (`parada`).
    Stop,
    /// The machine resumed (`retomada`).
    Resume,
    /// Line speed changed (`velocidade`).
    Speed,
    Other(String),
}

impl UpdateType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Signal => "sinal",
            Self::Stop => "parada",
            Self::Resume => "retomada",
            Self::Speed => "velocidade",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for UpdateType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "sinal" => Self::Signal,
            "parada" => Self::Stop,
            "retomada" => Self::Resume,
            "velocidade" => Self::Speed,
            _ => Self::Other(s),
        }
    }
}

impl From<UpdateType> for String {
    fn from(t: UpdateType) -> Self {
        match t {
            UpdateType::Other(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters of the operator session running on a station.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorSession {
    #[serde(rename = "id_sessao", default)]
    pub session_id: Option<u64>,

    #[serde(rename = "id_operador", default)]
    pub operator_id: Option<u64>,

    #[serde(rename = "sinais", default)]
    pub signals: u64,

    #[serde(rename = "rejeitos", default)]
    pub rejects: u64,

    #[serde(rename = "sinais_validos", default)]
    pub valid_signals: u64,

    #[serde(rename = "tempo_decorrido_segundos", default)]
    pub elapsed_secs: u64,

    #[serde(rename = "tempo_paradas_segundos", default)]
    pub stopped_secs: u64,

    #[serde(rename = "tempo_valido_segundos", default)]
    pub valid_secs: u64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Production order currently running on a machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductionMap {
    #[serde(rename = "id_mapa", default)]
    pub map_id: Option<u64>,

    #[serde(rename = "id_produto", default)]
    pub product_id: Option<u64>,

    #[serde(rename = "qt_produzir", default)]
    pub quantity: u64,

    #[serde(rename = "sinais", default)]
    pub signals: u64,

    #[serde(rename = "rejeitos", default)]
    pub rejects: u64,

    #[serde(rename = "sinais_validos", default)]
    pub valid_signals: u64,

    #[serde(rename = "saldo_a_produzir", default)]
    pub remaining: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A stop that has not been resumed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveStop {
    pub id: u64,

    #[serde(rename = "inicio", default)]
    pub started_at: Option<f64>,

    #[serde(rename = "motivo_id", default)]
    pub reason_id: Option<u64>,
}

/// Snapshot of a machine as pushed by the server.
///
/// Only the fields this crate interprets are typed; everything else is
/// kept in `extra` and passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineData {
    #[serde(default)]
    pub id: Option<StationId>,

    #[serde(rename = "nome", default)]
    pub name: Option<String>,

    #[serde(rename = "multipostos", default)]
    pub multi_station: bool,

    #[serde(rename = "velocidade", default)]
    pub speed: Option<f64>,

    #[serde(rename = "maquina_pai", default)]
    pub parent: Option<StationId>,

    /// `true` while producing, `false` while stopped.
    #[serde(default)]
    pub status: Option<bool>,

    #[serde(rename = "sessao_operador", default)]
    pub operator_session: Option<OperatorSession>,

    #[serde(rename = "producao_mapa", default)]
    pub production_map: Option<ProductionMap>,

    #[serde(rename = "parada_ativa", default)]
    pub active_stop: Option<ActiveStop>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `machine_update` subscription event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineUpdate {
    pub target_machine_id: StationId,

    /// Set when a child station's update is forwarded through its parent.
    #[serde(default)]
    pub source_machine_id: Option<StationId>,

    #[serde(default)]
    pub update_type: Option<UpdateType>,

    #[serde(rename = "is_child_update", default)]
    pub child_flag: bool,

    #[serde(default)]
    pub machine_data: MachineData,

    #[serde(default)]
    pub additional_data: Option<Value>,

    /// Server time, unix seconds.
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl MachineUpdate {
    /// A child-station update either says so explicitly or names a source
    /// different from its target.
    pub fn is_child(&self) -> bool {
        self.child_flag
            || self
                .source_machine_id
                .is_some_and(|source| source != self.target_machine_id)
    }

    /// The station whose counters this update carries.
    pub fn station_id(&self) -> StationId {
        self.source_machine_id.unwrap_or(self.target_machine_id)
    }
}

/// `production_alert` subscription event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionAlert {
    #[serde(default)]
    pub alert_type: String,

    pub target_machine_id: StationId,

    #[serde(default)]
    pub source_machine_id: Option<StationId>,

    #[serde(rename = "is_child_alert", default)]
    pub child_flag: bool,

    #[serde(default)]
    pub alert_data: Value,

    #[serde(default)]
    pub timestamp: Option<f64>,
}

// ── Inbound classification ───────────────────────────────────────────

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Ack(Acknowledgement),
    Connection(ConnectionNotice),
    MachineUpdate(MachineUpdate),
    ProductionAlert(ProductionAlert),
    /// A `type` this crate does not model.
    Other { kind: String, payload: Value },
    /// Valid JSON without `success` or `type`.
    Untyped(Value),
}

impl InboundMessage {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })?;
        Self::from_value(value)
    }

    /// Classify a JSON value. A boolean `success` field takes precedence
    /// over `type`.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        if value.get("success").is_some_and(Value::is_boolean) {
            return decode(&value).map(Self::Ack);
        }

        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        match kind.as_deref() {
            Some("connection") => decode(&value).map(Self::Connection),
            Some("machine_update") => decode(&value).map(Self::MachineUpdate),
            Some("production_alert") => decode(&value).map(Self::ProductionAlert),
            Some(other) => Ok(Self::Other {
                kind: other.to_owned(),
                payload: value,
            }),
            None => Ok(Self::Untyped(value)),
        }
    }

    /// The discriminant used for logging and message inspection.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Ack(_) => "ack",
            Self::Connection(_) => "connection",
            Self::MachineUpdate(_) => "machine_update",
            Self::ProductionAlert(_) => "production_alert",
            Self::Other { kind, .. } => kind,
            Self::Untyped(_) => "untyped",
        }
    }
}

fn decode<'a, T: Deserialize<'a>>(value: &'a Value) -> Result<T, Error> {
    T::deserialize(value).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: value.to_string(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn start_session_omits_absent_session_id() {
        let cmd = WireCommand::StartOperatorSession {
            station: StationId::new(12),
            operator: 4,
            shift: 1,
            session: None,
        };

        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({
                "type": "iniciar_sessao_operador",
                "id_maquina": 12,
                "id_operador": 4,
                "id_turno": 1
            })
        );
    }

    #[test]
    fn start_production_map_defaults_quantity_and_skips_options() {
        let cmd = WireCommand::StartProductionMap {
            station: StationId::new(3),
            map: 90,
            product: 7,
            map_item: Some(2),
            color: None,
            die: None,
            quantity: 0,
        };

        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({
                "type": "iniciar_producao_mapa",
                "id_maquina": 3,
                "id_mapa": 90,
                "id_produto": 7,
                "id_item_mapa": 2,
                "qt_produzir": 0
            })
        );
    }

    #[test]
    fn stop_reason_has_no_station() {
        let cmd = WireCommand::AssignStopReason { stop: 55, reason: 8 };
        assert_eq!(cmd.station(), None);
        assert_eq!(cmd.name(), "atribuir_motivo_parada");
        assert_eq!(
            cmd.to_json().unwrap(),
            r#"{"type":"atribuir_motivo_parada","id_parada":55,"id_motivo":8}"#
        );
    }

    #[test]
    fn success_field_wins_over_type() {
        let msg = InboundMessage::from_value(json!({
            "success": true,
            "type": "machine_update",
            "message": "Inscrito na máquina 5"
        }))
        .unwrap();

        assert!(matches!(msg, InboundMessage::Ack(ref ack) if ack.success));
    }

    #[test]
    fn rejection_matches_server_wording() {
        let already = Acknowledgement {
            success: false,
            message: None,
            error: Some("Já existe sessão ativa para a máquina 4".into()),
            code: None,
            data: None,
            timestamp: None,
        };
        assert_eq!(already.rejection(), Some(Rejection::SessionAlreadyActive));

        let missing = Acknowledgement {
            error: Some("Máquina 99 não encontrada".into()),
            ..already.clone()
        };
        assert_eq!(missing.rejection(), Some(Rejection::MachineNotFound));

        let other = Acknowledgement {
            error: Some("Comando inválido".into()),
            ..already
        };
        assert_eq!(other.rejection(), Some(Rejection::Other));
        assert_eq!(Acknowledgement::ok("fine").rejection(), None);
    }

    #[test]
    fn structured_code_beats_message_text() {
        let ack: Acknowledgement = serde_json::from_value(json!({
            "success": false,
            "error": "Máquina 3 não encontrada",
            "code": "session_already_active"
        }))
        .unwrap();

        assert_eq!(ack.rejection(), Some(Rejection::SessionAlreadyActive));
    }

    #[test]
    fn parse_machine_update() {
        let text = json!({
            "type": "machine_update",
            "update_type": "sinal",
            "target_machine_id": 10,
            "source_machine_id": 11,
            "is_child_update": true,
            "machine_data": {
                "id": 11,
                "nome": "Posto 1",
                "multipostos": false,
                "velocidade": 42.5,
                "status": true,
                "id_empresa": 2,
                "sessao_operador": {
                    "id_sessao": 900,
                    "sinais": 120,
                    "rejeitos": 3,
                    "sinais_validos": 117,
                    "tempo_decorrido_segundos": 3600,
                    "tempo_paradas_segundos": 120,
                    "tempo_valido_segundos": 3480,
                    "tempo_paradas_validas": 60
                },
                "producao_mapa": null,
                "parada_ativa": null
            },
            "additional_data": { "delta": 1 },
            "timestamp": 1_760_000_000.5
        })
        .to_string();

        let InboundMessage::MachineUpdate(update) = InboundMessage::parse(&text).unwrap() else {
            panic!("expected machine_update");
        };

        assert_eq!(update.update_type, Some(UpdateType::Signal));
        assert_eq!(update.station_id(), StationId::new(11));
        assert!(update.is_child());

        let data = &update.machine_data;
        assert_eq!(data.name.as_deref(), Some("Posto 1"));
        assert_eq!(data.extra["id_empresa"], 2);

        let session = data.operator_session.as_ref().unwrap();
        assert_eq!(session.signals, 120);
        assert_eq!(session.valid_secs, 3480);
        assert_eq!(session.extra["tempo_paradas_validas"], 60);
        assert!(data.production_map.is_none());
    }

    #[test]
    fn child_classification_by_source_and_target() {
        let mut update: MachineUpdate = serde_json::from_value(json!({
            "type": "machine_update",
            "target_machine_id": 1,
            "source_machine_id": 2
        }))
        .unwrap();
        assert!(update.is_child());

        update.source_machine_id = Some(StationId::new(1));
        assert!(!update.is_child());

        update.source_machine_id = None;
        assert!(!update.is_child());
        assert_eq!(update.station_id(), StationId::new(1));
    }

    #[test]
    fn unknown_update_type_is_preserved() {
        let update: MachineUpdate = serde_json::from_value(json!({
            "target_machine_id": 1,
            "update_type": "contador"
        }))
        .unwrap();

        assert_eq!(update.update_type, Some(UpdateType::Other("contador".into())));
        assert_eq!(
            serde_json::to_value(&update.update_type).unwrap(),
            json!("contador")
        );
    }

    #[test]
    fn unrecognized_and_untyped_frames() {
        let other = InboundMessage::parse(r#"{"type":"heartbeat","seq":4}"#).unwrap();
        assert_eq!(other.type_name(), "heartbeat");
        assert!(matches!(other, InboundMessage::Other { .. }));

        let untyped = InboundMessage::parse(r#"{"hello":"world"}"#).unwrap();
        assert!(matches!(untyped, InboundMessage::Untyped(_)));
    }

    #[test]
    fn malformed_frame_keeps_body() {
        let err = InboundMessage::parse("not json").unwrap_err();
        match err {
            Error::Deserialization { body, .. } => assert_eq!(body, "not json"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn station_id_parses_from_cli_text() {
        assert_eq!(" 42 ".parse::<StationId>().unwrap(), StationId::new(42));
        assert!("abc".parse::<StationId>().is_err());
    }
}
