// ── Local station cache ──
//
// Last-known counters per station plus a ring buffer of received
// events. Reads only ever return records younger than `max_age`; stale
// records stay physically present until the sweep removes them.
// Every station write persists the whole cache (best effort) and bumps
// a `watch` version so consumers can re-render instead of polling.
// Without a writer task the snapshot is written inline; with one, the
// caller never touches the disk.

mod fallback;
mod persist;
mod record;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use stationlink_api::{MachineUpdate, ProductionAlert, StationId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;

pub use fallback::{DataSource, FallbackStation, LocalStation};
pub use record::{StationRecord, StationUpdate, StoredMessage};

/// Default page size for message inspection.
pub const DEFAULT_MESSAGE_LIMIT: usize = 50;

/// Counts returned by [`StationStore::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_messages: usize,
    /// Fresh stations only.
    pub stations_count: usize,
    /// Stations waiting for the next sweep.
    pub stale_stations: usize,
    pub last_update: DateTime<Utc>,
    /// Approximate serialized size in bytes.
    pub memory_usage: usize,
}

/// Full dump for debugging, stale records included.
#[derive(Debug, Clone, Serialize)]
pub struct StoreExport {
    pub stations: Vec<StationRecord>,
    pub messages: Vec<StoredMessage>,
    pub stats: StoreStats,
    pub timestamp: DateTime<Utc>,
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub stations_removed: usize,
    pub messages_removed: usize,
}

/// The local station cache.
///
/// Thread-safe: station records live in a `DashMap`, the message ring
/// in a short-lived mutex. Share it behind an `Arc`.
pub struct StationStore {
    config: CacheConfig,
    max_age: TimeDelta,
    clock: Arc<dyn Clock>,
    stations: DashMap<StationId, StationRecord>,
    messages: Mutex<VecDeque<StoredMessage>>,
    version: watch::Sender<u64>,
    writes: persist::WriteQueue,
}

impl std::fmt::Debug for StationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StationStore")
            .field("path", &self.config.path)
            .field("stations", &self.stations.len())
            .finish_non_exhaustive()
    }
}

impl StationStore {
    /// In-memory or file-backed cache using the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::open(config, Arc::new(SystemClock))
    }

    /// Create the cache, loading the snapshot at `config.path` if present.
    /// An unreadable snapshot is logged and ignored.
    pub fn open(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let (version, _) = watch::channel(0u64);
        let store = Self {
            max_age: TimeDelta::from_std(config.max_age).unwrap_or(TimeDelta::MAX),
            config,
            clock,
            stations: DashMap::new(),
            messages: Mutex::new(VecDeque::new()),
            version,
            writes: persist::WriteQueue::default(),
        };

        if let Some(path) = store.config.path.as_deref() {
            match persist::load(path) {
                Ok(Some(snapshot)) => {
                    for record in snapshot.stations {
                        store.stations.insert(record.id, record);
                    }
                    let mut messages = store.lock_messages();
                    messages.extend(snapshot.messages);
                    let excess = messages.len().saturating_sub(store.config.max_messages);
                    messages.drain(..excess);
                    info!(
                        path = %path.display(),
                        stations = store.stations.len(),
                        messages = messages.len(),
                        "station cache loaded"
                    );
                }
                Ok(None) => debug!(path = %path.display(), "no station cache yet"),
                Err(e) => warn!(error = %e, "ignoring unreadable station cache"),
            }
        }

        store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ── Stations ─────────────────────────────────────────────────────

    /// Merge `update` into the stored record (new values win), stamp it
    /// with the current time and persist.
    pub fn store_station_data(&self, update: StationUpdate) -> StationRecord {
        let now = self.clock.now();
        let record = match self.stations.entry(update.id) {
            Entry::Occupied(mut entry) => {
                let merged = update.merge_into(Some(entry.get()), now);
                entry.insert(merged.clone());
                merged
            }
            Entry::Vacant(entry) => {
                let created = update.merge_into(None, now);
                entry.insert(created.clone());
                created
            }
        };

        debug!(
            station = %record.id,
            name = %record.name,
            signals = record.signals,
            rejects = record.rejects,
            "station data stored"
        );
        self.persist();
        self.bump();
        record
    }

    /// The record for `id`, unless missing or stale.
    pub fn get_station_data(&self, id: StationId) -> Option<StationRecord> {
        let now = self.clock.now();
        self.stations
            .get(&id)
            .filter(|r| self.is_fresh(r, now))
            .map(|r| r.clone())
    }

    /// Fresh stations whose parent is `parent`, sorted by name.
    pub fn get_stations_by_parent(&self, parent: StationId) -> Vec<StationRecord> {
        let now = self.clock.now();
        let mut stations: Vec<StationRecord> = self
            .stations
            .iter()
            .filter(|r| r.parent == Some(parent) && self.is_fresh(r, now))
            .map(|r| r.clone())
            .collect();
        stations.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        stations
    }

    /// Every fresh station, ascending by id.
    pub fn stations(&self) -> Vec<StationRecord> {
        let now = self.clock.now();
        let mut stations: Vec<StationRecord> = self
            .stations
            .iter()
            .filter(|r| self.is_fresh(r, now))
            .map(|r| r.clone())
            .collect();
        stations.sort_by_key(|r| r.id);
        stations
    }

    /// Update the cache from the operator-session counters of a
    /// `machine_update`. Returns `None` (and changes nothing) when the
    /// message carries no session.
    pub fn update_station_from_message(&self, update: &MachineUpdate) -> Option<StationRecord> {
        let patch = StationUpdate::from_machine_update(update)?;
        Some(self.store_station_data(patch))
    }

    /// Merge fresh children of `parent` over `fallback` rows.
    ///
    /// Live records replace fallback rows with the same id; fallback rows
    /// are stamped as already stale. Sorted by name.
    pub fn stations_with_fallback(
        &self,
        parent: StationId,
        fallback: &[FallbackStation],
    ) -> Vec<LocalStation> {
        let stale = self
            .clock
            .now()
            .checked_sub_signed(self.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut merged: BTreeMap<StationId, LocalStation> = fallback
            .iter()
            .map(|row| (row.id, LocalStation::from_fallback(row, stale)))
            .collect();
        for record in self.get_stations_by_parent(parent) {
            merged.insert(record.id, record.into());
        }

        let mut rows: Vec<LocalStation> = merged.into_values().collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rows
    }

    // ── Messages ─────────────────────────────────────────────────────

    /// Append to the ring buffer, evicting the oldest beyond `max_messages`.
    pub fn store_message(&self, message: StoredMessage) {
        let mut messages = self.lock_messages();
        messages.push_back(message);
        while messages.len() > self.config.max_messages {
            messages.pop_front();
        }
    }

    /// Record a `machine_update` and apply its session counters.
    pub fn record_update(&self, update: &MachineUpdate) -> Option<StationRecord> {
        self.store_message(StoredMessage::from_update(update, self.clock.now()));
        self.update_station_from_message(update)
    }

    /// Record a `production_alert`.
    pub fn record_alert(&self, alert: &ProductionAlert) {
        self.store_message(StoredMessage::from_alert(alert, self.clock.now()));
    }

    /// Up to `limit` messages of `kind`, newest first.
    pub fn messages_by_type(&self, kind: &str, limit: usize) -> Vec<StoredMessage> {
        self.newest(limit, |m| m.kind == kind)
    }

    /// Up to `limit` messages targeting or sourced from `station`, newest first.
    pub fn messages_by_station(&self, station: StationId, limit: usize) -> Vec<StoredMessage> {
        self.newest(limit, |m| m.involves(station))
    }

    /// Up to `limit` messages of any kind, newest first.
    pub fn recent_messages(&self, limit: usize) -> Vec<StoredMessage> {
        self.newest(limit, |_| true)
    }

    fn newest(&self, limit: usize, keep: impl Fn(&StoredMessage) -> bool) -> Vec<StoredMessage> {
        self.lock_messages()
            .iter()
            .rev()
            .filter(|m| keep(m))
            .take(limit)
            .cloned()
            .collect()
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Remove stale stations and messages older than `max_age`.
    pub fn cleanup(&self) -> SweepReport {
        let now = self.clock.now();

        let before = self.stations.len();
        self.stations.retain(|_, record| self.is_fresh(record, now));
        let stations_removed = before - self.stations.len();

        let messages_removed = {
            let mut messages = self.lock_messages();
            let before = messages.len();
            messages.retain(|m| now - m.received_at < self.max_age);
            before - messages.len()
        };

        let report = SweepReport {
            stations_removed,
            messages_removed,
        };
        if stations_removed > 0 || messages_removed > 0 {
            info!(stations_removed, messages_removed, "station cache swept");
            self.persist();
            self.bump();
        }
        report
    }

    /// Run [`cleanup`](Self::cleanup) every `sweep_interval` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = self.config.sweep_interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        store.cleanup();
                    }
                }
            }
        })
    }

    /// Move snapshot writes off the caller's thread until `cancel` fires.
    ///
    /// Bursts coalesce: only the newest snapshot is written. The write
    /// still pending at cancellation is flushed before the task ends.
    pub fn spawn_writer(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        store.writes.activate();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = store.writes.ready() => {
                        if let Some(write) = store.writes.take() {
                            store.write_off_thread(write).await;
                        }
                    }
                }
            }
            if let Some(write) = store.writes.deactivate() {
                store.write_off_thread(write).await;
            }
            debug!("station cache writer stopped");
        })
    }

    pub fn stats(&self) -> StoreStats {
        let now = self.clock.now();
        let fresh = self
            .stations
            .iter()
            .filter(|r| self.is_fresh(r, now))
            .count();
        let total_messages = self.lock_messages().len();
        let memory_usage = serde_json::to_vec(&(self.all_records(), self.all_messages()))
            .map_or(0, |bytes| bytes.len());

        StoreStats {
            total_messages,
            stations_count: fresh,
            stale_stations: self.stations.len().saturating_sub(fresh),
            last_update: now,
            memory_usage,
        }
    }

    pub fn export(&self) -> StoreExport {
        StoreExport {
            stations: self.all_records(),
            messages: self.all_messages(),
            stats: self.stats(),
            timestamp: self.clock.now(),
        }
    }

    /// Drop everything, including the snapshot file.
    pub fn clear(&self) {
        self.stations.clear();
        self.lock_messages().clear();
        self.write(persist::Write::Remove);
        self.bump();
        info!("station cache cleared");
    }

    /// Physically stored stations, stale ones included.
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    // ── Change notification ──────────────────────────────────────────

    /// Bumped on every station change, sweep and clear.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn is_fresh(&self, record: &StationRecord, now: DateTime<Utc>) -> bool {
        now - record.last_update < self.max_age
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    fn lock_messages(&self) -> MutexGuard<'_, VecDeque<StoredMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn all_records(&self) -> Vec<StationRecord> {
        let mut records: Vec<StationRecord> = self.stations.iter().map(|r| r.clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    fn all_messages(&self) -> Vec<StoredMessage> {
        self.lock_messages().iter().cloned().collect()
    }

    fn persist(&self) {
        if self.config.path.is_none() {
            return;
        }

        let messages = {
            let messages = self.lock_messages();
            let skip = messages.len().saturating_sub(self.config.persisted_messages);
            messages.iter().skip(skip).cloned().collect()
        };
        self.write(persist::Write::Save(persist::Snapshot {
            stations: self.all_records(),
            messages,
            timestamp: self.clock.now(),
        }));
    }

    fn write(&self, write: persist::Write) {
        let Some(path) = self.config.path.as_deref() else {
            return;
        };
        if let Some(write) = self.writes.offer(write) {
            if let Err(e) = persist::apply(path, &write) {
                warn!(error = %e, "station cache not persisted");
            }
        }
    }

    async fn write_off_thread(&self, write: persist::Write) {
        let Some(path) = self.config.path.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || persist::apply(&path, &write)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "station cache not persisted"),
            Err(e) => warn!(error = %e, "station cache writer failed"),
        }
    }
}
