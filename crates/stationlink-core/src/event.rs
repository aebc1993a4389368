// ── Typed events ──
//
// Inbound frames are routed to listeners by `EventKind`. The set of kinds
// is closed except for `Other`, which carries the `type` of any message
// this crate does not model so new server events are still reachable.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use stationlink_api::{
    Acknowledgement, ConnectionNotice, InboundMessage, MachineData, MachineUpdate,
    ProductionAlert, UpdateType,
};

/// Listener registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Socket opened or closed, or the server greeted us.
    Connection,
    /// Every `machine_update`.
    MachineUpdate,
    /// `machine_update` narrowed to one `update_type`.
    MachineUpdateOf(UpdateType),
    ProductionAlert,
    CommandSuccess,
    CommandError,
    /// A successful acknowledgement whose data describes an operator session.
    SessionStatus,
    /// A successful acknowledgement whose data describes a machine.
    MachineSnapshot,
    /// A session start hit an already running session. Also reported as
    /// [`CommandSuccess`](Self::CommandSuccess).
    SessionAlreadyActive,
    /// The server does not know the addressed machine.
    MachineNotFound,
    /// A socket failed to open or broke.
    TransportError,
    /// Every decoded frame, whatever its kind.
    Message,
    /// Any other `type`.
    Other(String),
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::MachineUpdate => f.write_str("machine_update"),
            Self::MachineUpdateOf(t) => write!(f, "machine_update_{t}"),
            Self::ProductionAlert => f.write_str("production_alert"),
            Self::CommandSuccess => f.write_str("command_success"),
            Self::CommandError => f.write_str("command_error"),
            Self::SessionStatus => f.write_str("session_status"),
            Self::MachineSnapshot => f.write_str("machine_data"),
            Self::SessionAlreadyActive => f.write_str("session_already_active"),
            Self::MachineNotFound => f.write_str("machine_not_found"),
            Self::TransportError => f.write_str("error"),
            Self::Message => f.write_str("message"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// Connectivity as seen by listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Set when reconnection has given up.
    pub error: Option<String>,
    /// The server's greeting, when this status came from one.
    pub notice: Option<ConnectionNotice>,
}

impl ConnectionStatus {
    pub fn connected() -> Self {
        Self {
            connected: true,
            error: None,
            notice: None,
        }
    }

    pub fn disconnected(error: Option<String>) -> Self {
        Self {
            connected: false,
            error,
            notice: None,
        }
    }
}

/// Payload handed to listeners. Shared payloads are reference counted so
/// fan-out never clones message bodies.
#[derive(Debug, Clone)]
pub enum StationEvent {
    Connection(ConnectionStatus),
    MachineUpdate(Arc<MachineUpdate>),
    ProductionAlert(Arc<ProductionAlert>),
    CommandSuccess(Arc<Acknowledgement>),
    CommandError(Arc<Acknowledgement>),
    SessionStatus(Arc<Value>),
    MachineSnapshot(Arc<MachineData>),
    SessionAlreadyActive(Arc<Acknowledgement>),
    MachineNotFound(Arc<Acknowledgement>),
    TransportError(String),
    Message(Arc<InboundMessage>),
}
