//! In-memory cache store: one entry per query key, last write wins.
//!
//! Every operation takes the store lock for its whole duration and never
//! awaits while holding it, so operations are atomic with respect to each
//! other. Reads against the remote side are tracked by a per-key generation:
//! a completion is applied only if no newer fetch, write-guard or cancellation
//! bumped the generation in the meantime.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::debug;

use super::entry::{CacheEntry, QueryStatus};
use super::key::QueryKey;
use crate::gateway::GatewayError;

struct Slot {
  entry: Option<CacheEntry>,
  generation: u64,
  in_flight: Option<AbortHandle>,
  /// A not-found read stores `null` instead of an error.
  absent_on_not_found: bool,
  watcher: watch::Sender<Option<CacheEntry>>,
}

impl Slot {
  fn new() -> Self {
    let (watcher, _) = watch::channel(None);
    Self {
      entry: None,
      generation: 0,
      in_flight: None,
      absent_on_not_found: false,
      watcher,
    }
  }

  fn entry_mut(&mut self, key: &QueryKey) -> &mut CacheEntry {
    self
      .entry
      .get_or_insert_with(|| CacheEntry::empty(key.clone()))
  }

  fn publish(&self) {
    self.watcher.send_replace(self.entry.clone());
  }
}

/// Proof that a read was started; needed to apply its result.
#[derive(Debug)]
pub struct FetchTicket {
  key: QueryKey,
  generation: u64,
}

impl FetchTicket {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }
}

/// Pre-mutation copy of an entry, owned by exactly one mutation.
#[derive(Debug)]
pub struct Snapshot {
  entry: CacheEntry,
}

impl Snapshot {
  pub fn key(&self) -> &QueryKey {
    &self.entry.key
  }

  pub fn data(&self) -> Option<&Value> {
    self.entry.data.as_ref()
  }
}

/// Receiving end of scheduled invalidations.
pub struct InvalidationQueue {
  rx: mpsc::UnboundedReceiver<QueryKey>,
}

impl InvalidationQueue {
  /// Wait for the next invalidated key. Returns `None` once the store is dropped.
  pub async fn recv(&mut self) -> Option<QueryKey> {
    self.rx.recv().await
  }

  /// Take an already-scheduled invalidation without waiting.
  pub fn try_recv(&mut self) -> Option<QueryKey> {
    self.rx.try_recv().ok()
  }
}

/// Session-scoped cache of server-owned resources.
pub struct CacheStore {
  slots: Mutex<HashMap<QueryKey, Slot>>,
  invalidations: mpsc::UnboundedSender<QueryKey>,
}

impl CacheStore {
  /// Create an empty store together with the queue its invalidations feed.
  pub fn new() -> (Self, InvalidationQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let store = Self {
      slots: Mutex::new(HashMap::new()),
      invalidations: tx,
    };
    (store, InvalidationQueue { rx })
  }

  fn slots(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Current entry for `key`, if one was ever created.
  pub fn read(&self, key: &QueryKey) -> Option<CacheEntry> {
    self.slots().get(key).and_then(|slot| slot.entry.clone())
  }

  /// Replace the entry's data wholesale and mark it successful.
  pub fn write(&self, key: &QueryKey, data: Value) -> CacheEntry {
    let mut slots = self.slots();
    let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
    let entry = slot.entry_mut(key);
    entry.data = Some(data);
    entry.status = QueryStatus::Success;
    entry.updated_at = Utc::now();
    entry.error = None;
    entry.is_invalidated = false;
    let written = entry.clone();
    slot.publish();
    debug!(%key, "cache write");
    written
  }

  /// Copy the entry for later [`restore`](Self::restore). `None` when there is
  /// no data to protect.
  pub fn snapshot(&self, key: &QueryKey) -> Option<Snapshot> {
    self
      .read(key)
      .filter(|entry| entry.data.is_some())
      .map(|entry| Snapshot { entry })
  }

  /// Put a snapshotted entry back exactly as it was.
  pub fn restore(&self, snapshot: Snapshot) {
    let key = snapshot.entry.key.clone();
    let mut slots = self.slots();
    let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
    slot.entry = Some(snapshot.entry);
    slot.publish();
    debug!(%key, "cache restored from snapshot");
  }

  /// Mark the entry stale and schedule a re-fetch. Readers keep seeing the
  /// stale data until the re-fetch lands.
  pub fn invalidate(&self, key: &QueryKey) {
    {
      let mut slots = self.slots();
      if let Some(slot) = slots.get_mut(key) {
        if let Some(entry) = slot.entry.as_mut() {
          entry.is_invalidated = true;
          slot.publish();
        }
      }
    }
    debug!(%key, "cache invalidated");
    // The queue only closes when the store itself is being torn down.
    let _ = self.invalidations.send(key.clone());
  }

  /// Prevent any outstanding read for `key` from landing in the store.
  ///
  /// Best-effort on the network side: the task is aborted but the request may
  /// still reach the server. Returns whether a read was outstanding.
  pub fn cancel_in_flight(&self, key: &QueryKey) -> bool {
    let mut slots = self.slots();
    let Some(slot) = slots.get_mut(key) else {
      return false;
    };

    slot.generation += 1;
    let handle = slot.in_flight.take();
    let was_pending = match slot.entry.as_mut() {
      Some(entry) if entry.status == QueryStatus::Pending => {
        entry.status = if entry.data.is_some() {
          QueryStatus::Success
        } else {
          QueryStatus::Idle
        };
        true
      }
      _ => false,
    };
    if was_pending {
      slot.publish();
    }
    drop(slots);

    let cancelled = handle.is_some() || was_pending;
    if let Some(handle) = handle {
      handle.abort();
    }
    if cancelled {
      debug!(%key, "cancelled in-flight read");
    }
    cancelled
  }

  /// Register a new read for `key`, superseding any read already in flight.
  pub fn begin_fetch(&self, key: &QueryKey) -> FetchTicket {
    let mut slots = self.slots();
    let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
    slot.generation += 1;
    if let Some(previous) = slot.in_flight.take() {
      previous.abort();
    }
    slot.entry_mut(key).status = QueryStatus::Pending;
    slot.publish();
    FetchTicket {
      key: key.clone(),
      generation: slot.generation,
    }
  }

  /// Attach the task performing the read so cancellation can abort it.
  pub fn attach_fetch(&self, ticket: &FetchTicket, handle: AbortHandle) {
    let mut slots = self.slots();
    match slots.get_mut(&ticket.key) {
      Some(slot) if slot.generation == ticket.generation => slot.in_flight = Some(handle),
      // Already superseded before the task was attached.
      _ => handle.abort(),
    }
  }

  /// Apply a finished read. Returns `false` if the read was cancelled or
  /// superseded, in which case the store is left untouched.
  pub fn complete_fetch(&self, ticket: FetchTicket, result: &Result<Value, GatewayError>) -> bool {
    let mut slots = self.slots();
    let Some(slot) = slots.get_mut(&ticket.key) else {
      return false;
    };
    if slot.generation != ticket.generation {
      debug!(key = %ticket.key, "discarding superseded read");
      return false;
    }

    slot.in_flight = None;
    let entry = slot.entry_mut(&ticket.key);
    match result {
      Ok(data) => {
        entry.data = Some(data.clone());
        entry.status = QueryStatus::Success;
        entry.updated_at = Utc::now();
        entry.error = None;
        entry.is_invalidated = false;
      }
      Err(err) => {
        entry.status = QueryStatus::Error;
        entry.error = Some(err.clone());
      }
    }
    slot.publish();
    true
  }

  /// Let reads of `key` that come back not-found land as a successful `null`,
  /// for resources whose absence is an ordinary answer.
  pub fn allow_absent(&self, key: &QueryKey) {
    self
      .slots()
      .entry(key.clone())
      .or_insert_with(Slot::new)
      .absent_on_not_found = true;
  }

  pub fn is_absent_allowed(&self, key: &QueryKey) -> bool {
    self
      .slots()
      .get(key)
      .is_some_and(|slot| slot.absent_on_not_found)
  }

  /// Observe every change to `key`, including its creation.
  pub fn subscribe(&self, key: &QueryKey) -> watch::Receiver<Option<CacheEntry>> {
    let mut slots = self.slots();
    slots
      .entry(key.clone())
      .or_insert_with(Slot::new)
      .watcher
      .subscribe()
  }

  /// Whether anything holds data for or listens to `key`.
  pub fn is_observed(&self, key: &QueryKey) -> bool {
    self
      .slots()
      .get(key)
      .is_some_and(|slot| slot.entry.is_some() || slot.watcher.receiver_count() > 0)
  }

  pub fn keys(&self) -> Vec<QueryKey> {
    let mut keys: Vec<QueryKey> = self
      .slots()
      .iter()
      .filter(|(_, slot)| slot.entry.is_some())
      .map(|(key, _)| key.clone())
      .collect();
    keys.sort();
    keys
  }
}
