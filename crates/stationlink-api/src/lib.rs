// stationlink-api: Wire protocol and WebSocket transport for the production telemetry server

pub mod error;
pub mod protocol;
pub mod websocket;

pub use error::Error;
pub use protocol::{
    Acknowledgement, ActiveStop, ConnectionNotice, InboundMessage, MachineData, MachineUpdate,
    OperatorSession, ProductionAlert, ProductionMap, Rejection, StationId, UpdateType,
    WireCommand,
};
pub use websocket::{
    Connector, SocketEvent, SocketFuture, SocketLink, WebSocketConnector, spawn_link,
};
