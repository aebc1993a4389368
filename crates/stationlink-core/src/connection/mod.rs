// ── Connection manager ──
//
// One socket shared by every consumer in the process. Owns the
// subscription set, the listener registry, the deferred-send outbox and
// the reconnection state machine.
//
// Each socket gets a generation number. The task reading a socket
// checks its generation before touching shared state, so a socket that
// was replaced or disconnected can never reconnect or dispatch.

mod outbox;
mod reconnect;
mod router;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use stationlink_api::{Connector, SocketEvent, SocketLink, StationId, WebSocketConnector, WireCommand};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::event::{ConnectionStatus, EventKind, StationEvent};
use crate::listener::{Listener, ListenerRegistry};

use self::outbox::Outbox;
pub use self::reconnect::backoff;

static SHARED: OnceLock<ConnectionManager> = OnceLock::new();

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for, or performing, reconnection attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// Fast reconnection gave up; a final attempt may still be scheduled.
    Failed,
}

/// How a send was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the open socket.
    Sent,
    /// The socket is opening; the frame goes out when it opens.
    Deferred,
    /// Nothing to do (already in the requested subscription state).
    Unchanged,
}

// ── Internal state ───────────────────────────────────────────────

enum Link {
    Idle,
    Opening {
        cancel: CancellationToken,
    },
    Open {
        outbound: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    },
}

struct LinkState {
    link: Link,
    generation: u64,
    subscribed: BTreeSet<StationId>,
    reconnect_attempts: u32,
    should_reconnect: bool,
    reconnect_timer: Option<CancellationToken>,
    outbox: Outbox,
}

struct ManagerInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<LinkState>,
    listeners: ListenerRegistry,
    connection_state: watch::Sender<ConnectionState>,
}

enum AfterClose {
    Retry { delay: Duration, attempt: u32 },
    Exhausted { delay: Duration, attempts: u32 },
    Stop,
}

// ── ConnectionManager ────────────────────────────────────────────

/// Handle to the shared telemetry connection.
///
/// Cheaply cloneable via `Arc<ManagerInner>`. Methods that open sockets
/// or start timers must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url.as_str())
            .field("state", &*self.inner.connection_state.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager that opens sockets through `connector`. Does NOT
    /// connect; call [`connect()`](Self::connect).
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let outbox = Outbox::new(config.outbox.clone());

        Self {
            inner: Arc::new(ManagerInner {
                config,
                connector,
                state: Mutex::new(LinkState {
                    link: Link::Idle,
                    generation: 0,
                    subscribed: BTreeSet::new(),
                    reconnect_attempts: 0,
                    should_reconnect: true,
                    reconnect_timer: None,
                    outbox,
                }),
                listeners: ListenerRegistry::default(),
                connection_state,
            }),
        }
    }

    /// Create a manager backed by a real WebSocket.
    pub fn websocket(config: ClientConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector))
    }

    /// The process-wide manager, created from `config` on first use.
    /// Later calls return the same instance and ignore `config`.
    pub fn shared(config: &ClientConfig) -> Self {
        SHARED.get_or_init(|| Self::websocket(config.clone())).clone()
    }

    /// Install `manager` as the process-wide instance. Fails (returning the
    /// instance already installed) if one exists.
    pub fn install_shared(manager: Self) -> Result<(), Self> {
        SHARED
            .set(manager)
            .map_err(|rejected| Self::installed().unwrap_or(rejected))
    }

    /// The process-wide manager, if one was created or installed.
    pub fn installed() -> Option<Self> {
        SHARED.get().cloned()
    }

    /// `true` when both handles point at the same manager.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Open the socket unless one is already open or opening.
    ///
    /// A pending reconnection timer is cancelled and the attempt made now.
    /// `should_reconnect` controls whether an unexpected close schedules
    /// reconnection. It is ignored while a socket is open or opening, so a
    /// late caller cannot re-enable reconnection the server turned off.
    pub fn connect(&self, should_reconnect: bool) {
        let mut guard = self.lock();
        let state = &mut *guard;

        if !matches!(state.link, Link::Idle) {
            debug!("connect: socket already open or opening");
            return;
        }
        state.should_reconnect = should_reconnect;
        if let Some(timer) = state.reconnect_timer.take() {
            timer.cancel();
        }
        self.open_link(state);
    }

    /// Close the socket and forget every subscription.
    ///
    /// Cancels any pending reconnection timer; the closing socket never
    /// triggers reconnection. Idempotent.
    pub fn disconnect(&self) {
        {
            let mut guard = self.lock();
            let state = &mut *guard;

            if let Some(timer) = state.reconnect_timer.take() {
                timer.cancel();
            }
            state.generation += 1;
            match std::mem::replace(&mut state.link, Link::Idle) {
                Link::Opening { cancel } | Link::Open { cancel, .. } => cancel.cancel(),
                Link::Idle => {}
            }
            state.subscribed.clear();
            state.outbox.clear();
            state.reconnect_attempts = 0;
            state.should_reconnect = false;
        }

        self.set_state(ConnectionState::Disconnected);
        info!("disconnected");
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Send a wire command.
    ///
    /// Open socket: written immediately. Opening socket: queued until it
    /// opens (bounded, short-lived). No socket: `Err(NotConnected)`.
    /// Delivery is never confirmed here; acknowledgements arrive as events.
    pub fn send_command(&self, command: &WireCommand) -> Result<SendOutcome, CoreError> {
        let mut guard = self.lock();
        Self::send_locked(&mut guard, command)
    }

    /// Send an operator command.
    pub fn execute(&self, command: Command) -> Result<SendOutcome, CoreError> {
        self.send_command(&command.into())
    }

    fn send_locked(state: &mut LinkState, command: &WireCommand) -> Result<SendOutcome, CoreError> {
        let text = command.to_json()?;

        match &state.link {
            Link::Open { outbound, .. } => {
                outbound.send(text).map_err(|_| CoreError::NotConnected)?;
                debug!(command = command.name(), "command sent");
                Ok(SendOutcome::Sent)
            }
            Link::Opening { .. } => {
                let queued = state.outbox.push(text, Instant::now())?;
                debug!(command = command.name(), queued, "socket opening, command deferred");
                Ok(SendOutcome::Deferred)
            }
            Link::Idle => Err(CoreError::NotConnected),
        }
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Start receiving events for `station`.
    ///
    /// No-op if already subscribed. While the socket is opening the
    /// station is recorded and subscribed on open. With no socket the
    /// membership is left unchanged and `Err(NotConnected)` returned.
    pub fn subscribe(&self, station: StationId) -> Result<SendOutcome, CoreError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.subscribed.contains(&station) {
            return Ok(SendOutcome::Unchanged);
        }

        let outcome = match state.link {
            // Replayed with the rest of the set when the socket opens.
            Link::Opening { .. } => SendOutcome::Deferred,
            _ => Self::send_locked(state, &WireCommand::Subscribe { station })?,
        };
        state.subscribed.insert(station);
        info!(%station, ?outcome, "subscribed");
        Ok(outcome)
    }

    /// Stop receiving events for `station`. No-op if not subscribed.
    pub fn unsubscribe(&self, station: StationId) -> Result<SendOutcome, CoreError> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if !state.subscribed.contains(&station) {
            return Ok(SendOutcome::Unchanged);
        }

        let outcome = match state.link {
            // The opening socket never saw the subscription.
            Link::Opening { .. } => SendOutcome::Deferred,
            _ => Self::send_locked(state, &WireCommand::Unsubscribe { station })?,
        };
        state.subscribed.remove(&station);
        info!(%station, ?outcome, "unsubscribed");
        Ok(outcome)
    }

    // ── Listeners ────────────────────────────────────────────────

    /// Register `listener` under `kind`. Returns `false` if it already was.
    pub fn add_listener(&self, kind: EventKind, listener: Listener) -> bool {
        self.inner.listeners.add(kind, listener)
    }

    /// Register a closure under `kind` and return its handle for removal.
    pub fn on(&self, kind: EventKind, callback: impl Fn(&StationEvent) + Send + Sync + 'static) -> Listener {
        let listener = Listener::new(callback);
        self.inner.listeners.add(kind, listener.clone());
        listener
    }

    /// Deregister `listener`. Returns `false` if it was not registered.
    pub fn remove_listener(&self, kind: &EventKind, listener: &Listener) -> bool {
        self.inner.listeners.remove(kind, listener)
    }

    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.inner.listeners.len(kind)
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        matches!(self.lock().link, Link::Open { .. })
    }

    /// Stations currently subscribed, ascending.
    pub fn subscribed_stations(&self) -> Vec<StationId> {
        self.lock().subscribed.iter().copied().collect()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection_state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    // ── Socket lifecycle (internal) ──────────────────────────────

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ConnectionState) {
        self.inner.connection_state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn emit(&self, kind: &EventKind, event: &StationEvent) {
        self.inner.listeners.dispatch(kind, event);
    }

    fn emit_status(&self, status: ConnectionStatus) {
        self.emit(&EventKind::Connection, &StationEvent::Connection(status));
    }

    fn open_link(&self, state: &mut LinkState) {
        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();
        state.link = Link::Opening {
            cancel: cancel.clone(),
        };

        let attempt = state.reconnect_attempts;
        self.set_state(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting { attempt }
        });
        debug!(generation, attempt, url = %self.inner.config.url, "opening socket");

        let manager = self.clone();
        tokio::spawn(async move { manager.run_link(generation, cancel).await });
    }

    async fn run_link(self, generation: u64, cancel: CancellationToken) {
        let url = self.inner.config.url.clone();

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = self.inner.connector.connect(&url) => result,
        };

        let mut link = match opened {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, url = %url, generation, "connection attempt failed");
                self.handle_close(generation, Some(e.to_string()));
                return;
            }
        };

        if !self.handle_open(generation, &link) {
            link.cancel.cancel();
            return;
        }

        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    link.cancel.cancel();
                    return;
                }
                event = link.inbound.recv() => event,
            };

            match event {
                Some(SocketEvent::Text(text)) => self.handle_frame(generation, &text),
                Some(SocketEvent::Closed { code, reason }) => {
                    info!(?code, %reason, generation, "socket closed");
                    self.handle_close(generation, None);
                    return;
                }
                Some(SocketEvent::Failed(e)) => {
                    warn!(error = %e, generation, "socket failed");
                    self.handle_close(generation, Some(e.to_string()));
                    return;
                }
                None => {
                    self.handle_close(generation, None);
                    return;
                }
            }
        }
    }

    /// Returns `false` if this socket was superseded while opening.
    fn handle_open(&self, generation: u64, link: &SocketLink) -> bool {
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.generation != generation {
                return false;
            }

            let outbound = link.outbound.clone();
            let Link::Opening { cancel } = std::mem::replace(&mut state.link, Link::Idle) else {
                return false;
            };
            state.reconnect_attempts = 0;

            for text in state.outbox.drain_fresh(Instant::now()) {
                if outbound.send(text).is_err() {
                    debug!("writer gone; queued command dropped");
                }
            }
            for &station in &state.subscribed {
                match (WireCommand::Subscribe { station }).to_json() {
                    Ok(text) => {
                        if outbound.send(text).is_err() {
                            debug!(%station, "writer gone; subscribe replay dropped");
                        }
                    }
                    Err(e) => error!(error = %e, %station, "could not encode subscribe"),
                }
            }
            debug!(stations = state.subscribed.len(), "subscriptions replayed");

            state.link = Link::Open { outbound, cancel };
        }

        self.set_state(ConnectionState::Connected);
        info!(url = %self.inner.config.url, generation, "connected");
        self.emit_status(ConnectionStatus::connected());
        true
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        if self.lock().generation != generation {
            return;
        }

        let message = match stationlink_api::InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        debug!(kind = message.type_name(), "frame received");

        let routed = router::route(message);
        if routed.disable_reconnect {
            self.lock().should_reconnect = false;
            warn!("automatic reconnection disabled");
        }
        for (kind, event) in &routed.events {
            self.emit(kind, event);
        }
    }

    fn handle_close(&self, generation: u64, failure: Option<String>) {
        let next = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.generation != generation {
                return;
            }

            state.link = Link::Idle;
            let dropped = state.outbox.clear();
            if dropped > 0 {
                debug!(dropped, "deferred commands discarded");
            }

            let policy = &self.inner.config.reconnect;
            if !state.should_reconnect {
                AfterClose::Stop
            } else if policy
                .max_attempts
                .is_none_or(|max| state.reconnect_attempts < max)
            {
                let delay = backoff(state.reconnect_attempts, policy);
                state.reconnect_attempts += 1;
                state.reconnect_timer = Some(self.schedule_reconnect(delay, false));
                AfterClose::Retry {
                    delay,
                    attempt: state.reconnect_attempts,
                }
            } else {
                let delay = policy.final_attempt_delay;
                state.reconnect_timer = Some(self.schedule_reconnect(delay, true));
                AfterClose::Exhausted {
                    delay,
                    attempts: state.reconnect_attempts,
                }
            }
        };

        if let Some(reason) = failure {
            self.emit(&EventKind::TransportError, &StationEvent::TransportError(reason));
        }

        match next {
            AfterClose::Retry { delay, attempt } => {
                info!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt,
                    "scheduling reconnect"
                );
                self.set_state(ConnectionState::Reconnecting { attempt });
                self.emit_status(ConnectionStatus::disconnected(None));
            }
            AfterClose::Exhausted { delay, attempts } => {
                error!(
                    attempts,
                    final_attempt_secs = delay.as_secs(),
                    "reconnection attempts exhausted"
                );
                self.set_state(ConnectionState::Failed);
                self.emit_status(ConnectionStatus::disconnected(Some(format!(
                    "Connection lost after {attempts} reconnection attempts"
                ))));
            }
            AfterClose::Stop => {
                self.set_state(ConnectionState::Disconnected);
                self.emit_status(ConnectionStatus::disconnected(None));
            }
        }
    }

    fn schedule_reconnect(&self, delay: Duration, reset_attempts: bool) -> CancellationToken {
        let token = CancellationToken::new();
        let timer = token.clone();
        let manager = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = timer.cancelled() => {}
                () = tokio::time::sleep(delay) => manager.fire_reconnect(&timer, reset_attempts),
            }
        });

        token
    }

    fn fire_reconnect(&self, timer: &CancellationToken, reset_attempts: bool) {
        let mut guard = self.lock();
        let state = &mut *guard;

        // Cancelled between wake-up and lock.
        if timer.is_cancelled() {
            return;
        }
        state.reconnect_timer = None;
        if reset_attempts {
            info!("final reconnection attempt");
            state.reconnect_attempts = 0;
        }
        if matches!(state.link, Link::Idle) {
            self.open_link(state);
        }
    }
}
