// ── Snapshot persistence ──
//
// The whole cache is written as one JSON document after every change.
// Writes go to a sibling temp file first and are renamed into place so
// a crash mid-write never leaves a truncated snapshot behind.
//
// Inside a running writer task, writes are handed off through a
// single-slot queue: only the newest pending write survives, and the
// disk work happens on the blocking pool.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::record::{StationRecord, StoredMessage};
use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    #[serde(default)]
    pub stations: Vec<StationRecord>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    pub timestamp: DateTime<Utc>,
}

/// `Ok(None)` when no snapshot exists yet.
pub(crate) fn load(path: &Path) -> Result<Option<Snapshot>, CoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(cache_error("read", path, &e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| cache_error("parse", path, &e))
}

pub(crate) fn save(path: &Path, snapshot: &Snapshot) -> Result<(), CoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| cache_error("create directory for", path, &e))?;
    }

    let body = serde_json::to_vec(snapshot).map_err(|e| cache_error("encode", path, &e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(|e| cache_error("write", &tmp, &e))?;
    fs::rename(&tmp, path).map_err(|e| cache_error("replace", path, &e))
}

/// One disk operation on the snapshot file.
#[derive(Debug)]
pub(crate) enum Write {
    Save(Snapshot),
    Remove,
}

pub(crate) fn apply(path: &Path, write: &Write) -> Result<(), CoreError> {
    match write {
        Write::Save(snapshot) => save(path, snapshot),
        Write::Remove => remove(path),
    }
}

#[derive(Debug, Default)]
struct Slot {
    /// A writer task is draining the slot.
    active: bool,
    pending: Option<Write>,
}

/// Latest-wins handoff between cache mutations and the writer task.
#[derive(Debug, Default)]
pub(crate) struct WriteQueue {
    slot: Mutex<Slot>,
    ready: Notify,
}

impl WriteQueue {
    /// Queue `write` for the writer task, replacing any write it has not
    /// started yet. Hands `write` back when no writer is running.
    pub(crate) fn offer(&self, write: Write) -> Option<Write> {
        {
            let mut slot = self.lock();
            if !slot.active {
                return Some(write);
            }
            slot.pending = Some(write);
        }
        self.ready.notify_one();
        None
    }

    pub(crate) fn take(&self) -> Option<Write> {
        self.lock().pending.take()
    }

    pub(crate) async fn ready(&self) {
        self.ready.notified().await;
    }

    pub(crate) fn activate(&self) {
        self.lock().active = true;
    }

    /// Stop accepting writes; returns the one still pending.
    pub(crate) fn deactivate(&self) -> Option<Write> {
        let mut slot = self.lock();
        slot.active = false;
        slot.pending.take()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn remove(path: &Path) -> Result<(), CoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(cache_error("remove", path, &e)),
    }
}

fn cache_error(action: &str, path: &Path, err: &dyn std::fmt::Display) -> CoreError {
    CoreError::Cache {
        message: format!("cannot {action} {}: {err}", path.display()),
    }
}
