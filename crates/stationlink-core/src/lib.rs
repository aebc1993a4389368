// stationlink-core: shared realtime connection, event fan-out and station cache.

pub mod binding;
pub mod clock;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod listener;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use binding::{
    BindingError, BindingOptions, ChildSignal, StationBinding, StationHandlers, StationView,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, StartProductionRequest};
pub use config::{CacheConfig, ClientConfig, DEFAULT_SERVER_URL, OutboxConfig, ReconnectPolicy};
pub use connection::{ConnectionManager, ConnectionState, SendOutcome, backoff};
pub use error::CoreError;
pub use event::{ConnectionStatus, EventKind, StationEvent};
pub use listener::Listener;
pub use store::{
    DEFAULT_MESSAGE_LIMIT, DataSource, FallbackStation, LocalStation, StationRecord,
    StationStore, StationUpdate, StoreExport, StoreStats, StoredMessage, SweepReport,
};

// Wire types consumers need alongside the core API.
pub use stationlink_api::{
    Acknowledgement, Connector, MachineData, MachineUpdate, ProductionAlert, Rejection,
    StationId, UpdateType, WireCommand,
};
