// ── Station binding ──
//
// One consumer's attachment to the shared connection. Mounting registers
// listeners and subscribes the station; unmounting removes exactly those
// listeners and unsubscribes. The shared socket is never torn down here.
//
// Listeners hold a `Weak` to the binding and check `mounted` before
// touching view state, since a frame already being dispatched can reach
// a listener after its binding unmounted.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use stationlink_api::{
    Acknowledgement, MachineData, MachineUpdate, ProductionAlert, Rejection, StationId,
    UpdateType,
};
use tracing::{debug, info};

use crate::command::{Command, StartProductionRequest};
use crate::connection::{ConnectionManager, SendOutcome};
use crate::error::CoreError;
use crate::event::{ConnectionStatus, EventKind, StationEvent};
use crate::listener::Listener;
use crate::store::StationStore;

/// Acknowledgement text the server sends for a successful subscribe.
const SUBSCRIBED_ACK: &str = "Inscrito na máquina";

pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Update of a child station, forwarded through its parent.
#[derive(Debug, Clone)]
pub struct ChildSignal {
    pub station: StationId,
    pub name: Option<String>,
    pub update: Arc<MachineUpdate>,
}

/// Errors surfaced to a binding's `on_error` handler.
#[derive(Debug, Clone)]
pub enum BindingError {
    /// The socket failed to open or broke.
    Transport(String),
    /// The server rejected a command.
    Rejected(Arc<Acknowledgement>),
    /// The server does not know the addressed machine.
    MachineNotFound(Arc<Acknowledgement>),
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(reason) => write!(f, "connection error: {reason}"),
            Self::Rejected(ack) | Self::MachineNotFound(ack) => f.write_str(ack.text()),
        }
    }
}

/// Consumer callbacks. Unset handlers are skipped.
#[derive(Clone, Default)]
pub struct StationHandlers {
    machine_data: Option<Handler<MachineData>>,
    signal: Option<Handler<MachineUpdate>>,
    child_signal: Option<Handler<ChildSignal>>,
    stop: Option<Handler<MachineUpdate>>,
    resume: Option<Handler<MachineUpdate>>,
    velocity: Option<Handler<MachineUpdate>>,
    alert: Option<Handler<ProductionAlert>>,
    command_success: Option<Handler<Acknowledgement>>,
    error: Option<Handler<BindingError>>,
    connection: Option<Handler<ConnectionStatus>>,
}

impl fmt::Debug for StationHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationHandlers")
            .field("machine_data", &self.machine_data.is_some())
            .field("signal", &self.signal.is_some())
            .field("child_signal", &self.child_signal.is_some())
            .field("alert", &self.alert.is_some())
            .field("error", &self.error.is_some())
            .finish_non_exhaustive()
    }
}

impl StationHandlers {
    /// Fresh state of the bound machine itself.
    #[must_use]
    pub fn on_machine_data(mut self, f: impl Fn(&MachineData) + Send + Sync + 'static) -> Self {
        self.machine_data = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_signal(mut self, f: impl Fn(&MachineUpdate) + Send + Sync + 'static) -> Self {
        self.signal = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_child_signal(mut self, f: impl Fn(&ChildSignal) + Send + Sync + 'static) -> Self {
        self.child_signal = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_stop(mut self, f: impl Fn(&MachineUpdate) + Send + Sync + 'static) -> Self {
        self.stop = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_resume(mut self, f: impl Fn(&MachineUpdate) + Send + Sync + 'static) -> Self {
        self.resume = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_velocity(mut self, f: impl Fn(&MachineUpdate) + Send + Sync + 'static) -> Self {
        self.velocity = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_alert(mut self, f: impl Fn(&ProductionAlert) + Send + Sync + 'static) -> Self {
        self.alert = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_command_success(
        mut self,
        f: impl Fn(&Acknowledgement) + Send + Sync + 'static,
    ) -> Self {
        self.command_success = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&BindingError) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_connection(mut self, f: impl Fn(&ConnectionStatus) + Send + Sync + 'static) -> Self {
        self.connection = Some(Arc::new(f));
        self
    }
}

/// What a consumer renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationView {
    pub connected: bool,
    pub error: Option<String>,
    /// Last state of the bound machine itself.
    pub machine: Option<MachineData>,
}

#[derive(Debug, Clone, Copy)]
pub struct BindingOptions {
    /// Request `connect()` on mount.
    pub auto_connect: bool,
    pub should_reconnect: bool,
}

impl Default for BindingOptions {
    fn default() -> Self {
        Self {
            auto_connect: true,
            should_reconnect: true,
        }
    }
}

struct BindingShared {
    station: StationId,
    manager: ConnectionManager,
    store: Arc<StationStore>,
    mounted: AtomicBool,
    handlers: Mutex<StationHandlers>,
    view: Mutex<StationView>,
}

/// A mounted consumer of one station's events.
///
/// Dropping the binding unmounts it.
pub struct StationBinding {
    shared: Arc<BindingShared>,
    options: BindingOptions,
    registrations: Vec<(EventKind, Listener)>,
}

impl fmt::Debug for StationBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationBinding")
            .field("station", &self.shared.station)
            .field("mounted", &self.is_mounted())
            .field("listeners", &self.registrations.len())
            .finish_non_exhaustive()
    }
}

impl StationBinding {
    /// Register listeners for `station`, connect if asked to and subscribe.
    ///
    /// With no socket yet the subscription happens when the connection
    /// is confirmed.
    pub fn mount(
        manager: &ConnectionManager,
        store: Arc<StationStore>,
        station: StationId,
        handlers: StationHandlers,
        options: BindingOptions,
    ) -> Self {
        let connected =
            manager.is_connected() && manager.subscribed_stations().contains(&station);
        let shared = Arc::new(BindingShared {
            station,
            manager: manager.clone(),
            store,
            mounted: AtomicBool::new(true),
            handlers: Mutex::new(handlers),
            view: Mutex::new(StationView {
                connected,
                ..StationView::default()
            }),
        });

        let mut binding = Self {
            shared,
            options,
            registrations: Vec::new(),
        };
        binding.listen(EventKind::Connection, BindingShared::on_connection);
        binding.listen(EventKind::MachineUpdate, BindingShared::on_machine_update);
        binding.listen(EventKind::ProductionAlert, BindingShared::on_alert);
        binding.listen(EventKind::MachineSnapshot, BindingShared::on_snapshot);
        binding.listen(EventKind::CommandSuccess, BindingShared::on_command_success);
        binding.listen(EventKind::CommandError, BindingShared::on_failure);
        binding.listen(EventKind::MachineNotFound, BindingShared::on_failure);
        binding.listen(EventKind::TransportError, BindingShared::on_failure);

        if options.auto_connect {
            manager.connect(options.should_reconnect);
        }
        binding.shared.try_subscribe();

        info!(%station, "station binding mounted");
        binding
    }

    fn listen(&mut self, kind: EventKind, handle: fn(&BindingShared, &StationEvent)) {
        let weak: Weak<BindingShared> = Arc::downgrade(&self.shared);
        let listener = self.shared.manager.on(kind.clone(), move |event| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.mounted.load(Ordering::Acquire) {
                handle(&shared, event);
            }
        });
        self.registrations.push((kind, listener));
    }

    pub fn station(&self) -> StationId {
        self.shared.station
    }

    pub fn is_mounted(&self) -> bool {
        self.shared.mounted.load(Ordering::Acquire)
    }

    pub fn view(&self) -> StationView {
        self.shared.view().clone()
    }

    /// Replace the consumer callbacks without re-registering listeners.
    pub fn set_handlers(&self, handlers: StationHandlers) {
        *self
            .shared
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handlers;
    }

    /// Remove this binding's listeners and unsubscribe its station.
    /// Idempotent. Other consumers keep the shared socket.
    pub fn unmount(&mut self) {
        if !self.shared.mounted.swap(false, Ordering::AcqRel) {
            return;
        }

        let manager = &self.shared.manager;
        for (kind, listener) in self.registrations.drain(..) {
            manager.remove_listener(&kind, &listener);
        }
        if let Err(e) = manager.unsubscribe(self.shared.station) {
            debug!(station = %self.shared.station, error = %e, "unsubscribe on unmount skipped");
        }
        info!(station = %self.shared.station, "station binding unmounted");
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Connect the shared socket (idempotent).
    pub fn connect(&self) {
        self.shared.manager.connect(self.options.should_reconnect);
    }

    /// Disconnect the shared socket for every consumer.
    pub fn disconnect(&self) {
        self.shared.manager.disconnect();
    }

    pub fn start_operator_session(
        &self,
        operator: u64,
        shift: u64,
        session: Option<u64>,
    ) -> Result<SendOutcome, CoreError> {
        self.execute(Command::StartOperatorSession {
            station: self.station(),
            operator,
            shift,
            session,
        })
    }

    pub fn end_operator_session(&self) -> Result<SendOutcome, CoreError> {
        self.execute(Command::EndOperatorSession {
            station: self.station(),
        })
    }

    pub fn query_session(&self) -> Result<SendOutcome, CoreError> {
        self.execute(Command::QuerySession {
            station: self.station(),
        })
    }

    /// Start producing `quantity` of `product` from production map `map`.
    pub fn start_production(
        &self,
        map: u64,
        product: u64,
        quantity: u64,
    ) -> Result<SendOutcome, CoreError> {
        self.start_production_with(
            StartProductionRequest::new(self.station(), map, product).quantity(quantity),
        )
    }

    /// Start production with a fully built request.
    pub fn start_production_with(
        &self,
        request: StartProductionRequest,
    ) -> Result<SendOutcome, CoreError> {
        self.execute(Command::StartProduction(request))
    }

    pub fn finish_production_partial(&self) -> Result<SendOutcome, CoreError> {
        self.execute(Command::FinishProductionPartial {
            station: self.station(),
        })
    }

    pub fn finish_production_complete(&self) -> Result<SendOutcome, CoreError> {
        self.execute(Command::FinishProductionComplete {
            station: self.station(),
        })
    }

    pub fn query_production_map(&self) -> Result<SendOutcome, CoreError> {
        self.execute(Command::QueryProductionMap {
            station: self.station(),
        })
    }

    pub fn query_machine(&self) -> Result<SendOutcome, CoreError> {
        self.execute(Command::QueryMachine {
            station: self.station(),
        })
    }

    /// Add a reject to `target`, which may be a child station.
    pub fn add_rejects(&self, target: StationId) -> Result<SendOutcome, CoreError> {
        self.execute(Command::AddRejects { station: target })
    }

    pub fn assign_stop_reason(&self, stop_id: u64, reason_id: u64) -> Result<SendOutcome, CoreError> {
        self.execute(Command::AssignStopReason { stop_id, reason_id })
    }

    fn execute(&self, command: Command) -> Result<SendOutcome, CoreError> {
        self.shared.manager.execute(command)
    }
}

impl Drop for StationBinding {
    fn drop(&mut self) {
        self.unmount();
    }
}

// ── Event handling ──────────────────────────────────────────────────

impl BindingShared {
    fn view(&self) -> MutexGuard<'_, StationView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> StationHandlers {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn try_subscribe(&self) {
        match self.manager.subscribe(self.station) {
            Ok(outcome) => debug!(station = %self.station, ?outcome, "subscribe requested"),
            Err(CoreError::NotConnected) => {
                debug!(station = %self.station, "no socket yet, subscribing on connect");
            }
            Err(e) => debug!(station = %self.station, error = %e, "subscribe failed"),
        }
    }

    fn on_connection(&self, event: &StationEvent) {
        let StationEvent::Connection(status) = event else {
            return;
        };
        {
            let mut view = self.view();
            view.connected = status.connected;
            if status.error.is_some() {
                view.error.clone_from(&status.error);
            }
        }
        if status.connected {
            self.try_subscribe();
        }
        if let Some(handler) = self.handlers().connection {
            handler(status);
        }
    }

    fn on_machine_update(&self, event: &StationEvent) {
        let StationEvent::MachineUpdate(update) = event else {
            return;
        };
        if update.target_machine_id != self.station {
            return;
        }
        self.store.record_update(update);
        let handlers = self.handlers();

        if update.is_child() {
            let signal = ChildSignal {
                station: update.station_id(),
                name: update.machine_data.name.clone(),
                update: Arc::clone(update),
            };
            debug!(station = %self.station, child = %signal.station, "child station update");
            if let Some(handler) = handlers.child_signal {
                handler(&signal);
            }
            return;
        }

        {
            let mut view = self.view();
            view.connected = true;
            view.error = None;
            view.machine = Some(update.machine_data.clone());
        }
        if let Some(handler) = &handlers.machine_data {
            handler(&update.machine_data);
        }

        let specific = match update.update_type {
            Some(UpdateType::Signal) => handlers.signal,
            Some(UpdateType::Stop) => handlers.stop,
            Some(UpdateType::Resume) => handlers.resume,
            Some(UpdateType::Speed) => handlers.velocity,
            Some(UpdateType::Other(_)) | None => None,
        };
        if let Some(handler) = specific {
            handler(update.as_ref());
        }
    }

    fn on_alert(&self, event: &StationEvent) {
        let StationEvent::ProductionAlert(alert) = event else {
            return;
        };
        if alert.target_machine_id != self.station {
            return;
        }
        self.store.record_alert(alert);
        if let Some(handler) = self.handlers().alert {
            handler(alert.as_ref());
        }
    }

    fn on_snapshot(&self, event: &StationEvent) {
        let StationEvent::MachineSnapshot(machine) = event else {
            return;
        };
        if machine.id != Some(self.station) {
            return;
        }
        {
            let mut view = self.view();
            view.connected = true;
            view.error = None;
            view.machine = Some(machine.as_ref().clone());
        }
        if let Some(handler) = self.handlers().machine_data {
            handler(machine.as_ref());
        }
    }

    fn on_command_success(&self, event: &StationEvent) {
        let StationEvent::CommandSuccess(ack) = event else {
            return;
        };
        if ack
            .message
            .as_deref()
            .is_some_and(|m| m.contains(SUBSCRIBED_ACK))
        {
            let mut view = self.view();
            view.connected = true;
            view.error = None;
        }
        if let Some(handler) = self.handlers().command_success {
            handler(ack.as_ref());
        }
    }

    fn on_failure(&self, event: &StationEvent) {
        let error = match event {
            StationEvent::TransportError(reason) => BindingError::Transport(reason.clone()),
            // Reported once, through `MachineNotFound`.
            StationEvent::CommandError(ack)
                if matches!(ack.rejection(), Some(Rejection::MachineNotFound)) =>
            {
                return;
            }
            StationEvent::CommandError(ack) => BindingError::Rejected(Arc::clone(ack)),
            StationEvent::MachineNotFound(ack) => BindingError::MachineNotFound(Arc::clone(ack)),
            _ => return,
        };
        if !matches!(error, BindingError::Rejected(_)) {
            self.view().error = Some(error.to_string());
        }
        if let Some(handler) = self.handlers().error {
            handler(&error);
        }
    }
}
