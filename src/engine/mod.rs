mod adjustments;
mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod registry;

pub use adjustments::AdjustmentLog;
pub use availability::{common_free, merge_overlapping, subtract_intervals};
pub use conflict::{detect, first_conflict};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::journal::{Journal, WalJournal};
use crate::model::*;
use crate::notify::{Dispatcher, Notice, NoticeKind};
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

/// Write guards over a sorted, deduplicated set of resources, plus a shared
/// hold on the compaction gate.
pub(crate) struct LockSet {
    guards: Vec<OwnedRwLockWriteGuard<ResourceState>>,
    _gate: Option<OwnedRwLockReadGuard<()>>,
}

impl LockSet {
    pub(crate) fn get(&self, key: &ResourceKey) -> Option<&ResourceState> {
        self.guards.iter().find(|g| g.key == *key).map(|g| &**g)
    }

    pub(crate) fn get_mut(&mut self, key: &ResourceKey) -> Option<&mut ResourceState> {
        self.guards.iter_mut().find(|g| g.key == *key).map(|g| &mut **g)
    }

    pub(crate) fn states(&self) -> impl Iterator<Item = &ResourceState> {
        self.guards.iter().map(|g| &**g)
    }
}

/// The timetable consistency engine for one tenant.
///
/// Each resource (room, teacher, group) has its own lock. A mutation write-locks
/// every resource it touches, in `ResourceKey` order, and holds them across
/// conflict check, journal write and apply.
pub struct Engine {
    resources: DashMap<ResourceKey, SharedResourceState>,
    /// Every booking ever committed, whatever its status.
    bookings: DashMap<Ulid, Booking>,
    adjustments: AdjustmentLog,
    /// Serializes registration and retirement, which change the map itself.
    registry_lock: Mutex<()>,
    /// Held shared by every mutation, exclusively by compaction.
    gate: Arc<RwLock<()>>,
    journal: Arc<dyn Journal>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and keep appending to it.
    pub fn new(wal_path: PathBuf, dispatcher: Arc<dyn Dispatcher>) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        let journal = Arc::new(WalJournal::spawn(wal));
        let engine = Self::with_journal(journal, dispatcher);
        engine.restore(&events)?;
        info!(
            "replayed {} journal records from {}: {} resources, {} bookings",
            events.len(),
            wal_path.display(),
            engine.resources.len(),
            engine.bookings.len()
        );
        Ok(engine)
    }

    /// Empty engine over an injected storage handle.
    pub fn with_journal(journal: Arc<dyn Journal>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            resources: DashMap::new(),
            bookings: DashMap::new(),
            adjustments: AdjustmentLog::new(),
            registry_lock: Mutex::new(()),
            gate: Arc::new(RwLock::new(())),
            journal,
            dispatcher,
        }
    }

    /// Rebuild state from journal records. We are the only owner of every lock
    /// here, so `try_write` never contends.
    pub fn restore(&self, events: &[Event]) -> io::Result<()> {
        for event in events {
            let mut guards = Vec::new();
            for key in self.event_keys(event) {
                let Some(rs) = self.get_resource(&key) else {
                    continue;
                };
                let guard = rs
                    .try_write_owned()
                    .map_err(|_| io::Error::other("replay: contended resource lock"))?;
                guards.push(guard);
            }
            self.apply(event, &mut LockSet { guards, _gate: None });
        }
        Ok(())
    }

    pub(crate) fn get_resource(&self, key: &ResourceKey) -> Option<SharedResourceState> {
        self.resources.get(key).map(|e| e.value().clone())
    }

    /// Enter the compaction gate, then write-lock `keys` in sorted order. Fails
    /// on unknown or retired resources. Every mutation starts here, even one
    /// that touches no resource state (`keys` empty).
    pub(crate) async fn lock_keys(
        &self,
        keys: impl IntoIterator<Item = ResourceKey>,
    ) -> Result<LockSet, EngineError> {
        let mut keys: Vec<ResourceKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let gate = self.gate.clone().read_owned().await;
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let rs = self
                .get_resource(&key)
                .ok_or(EngineError::UnknownResource(key))?;
            let guard = rs.write_owned().await;
            if guard.retired {
                return Err(EngineError::UnknownResource(key));
            }
            guards.push(guard);
        }
        Ok(LockSet {
            guards,
            _gate: Some(gate),
        })
    }

    /// Read-lock `keys` in sorted order.
    pub(crate) async fn read_keys(
        &self,
        keys: impl IntoIterator<Item = ResourceKey>,
    ) -> Result<Vec<OwnedRwLockReadGuard<ResourceState>>, EngineError> {
        let mut keys: Vec<ResourceKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let rs = self
                .get_resource(&key)
                .ok_or(EngineError::UnknownResource(key))?;
            let guard = rs.read_owned().await;
            if guard.retired {
                return Err(EngineError::UnknownResource(key));
            }
            guards.push(guard);
        }
        Ok(guards)
    }

    /// Journal first, then apply. A journal failure leaves state untouched.
    pub(crate) async fn persist_and_apply(
        &self,
        event: &Event,
        locks: &mut LockSet,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.journal.append(event).await {
            tracing::error!("journal append failed, mutation dropped: {e}");
            return Err(e);
        }
        self.apply(event, locks);
        Ok(())
    }

    pub(crate) fn emit(&self, kind: NoticeKind, booking: &Booking) {
        self.dispatcher.dispatch(&Notice::new(kind, booking));
    }

    /// Resources whose index an event changes. Unknown bookings contribute none.
    fn event_keys(&self, event: &Event) -> Vec<ResourceKey> {
        let mut keys = match event {
            Event::BookingCommitted { booking } => booking.resources.keys().to_vec(),
            Event::BatchCommitted { bookings } => bookings
                .iter()
                .flat_map(|b| b.resources.keys())
                .collect(),
            Event::BookingCancelled { id, .. } => self.booking_keys(id),
            Event::BookingSuperseded {
                old_id,
                replacement,
                ..
            } => {
                let mut keys = self.booking_keys(old_id);
                keys.extend(replacement.resources.keys());
                keys
            }
            Event::ResourceUpdated { key, .. } | Event::ResourceRetired { key } => vec![*key],
            Event::ResourceRegistered { .. } | Event::AdjustmentRecorded { .. } => Vec::new(),
        };
        keys.sort();
        keys.dedup();
        keys
    }

    fn booking_keys(&self, id: &Ulid) -> Vec<ResourceKey> {
        self.bookings
            .get(id)
            .map(|b| b.resources.keys().to_vec())
            .unwrap_or_default()
    }

    /// Apply an event to in-memory state. The caller holds write locks on
    /// every resource in `event_keys(event)` that still exists.
    fn apply(&self, event: &Event, locks: &mut LockSet) {
        match event {
            Event::BookingCommitted { booking } => self.apply_booking(booking, locks),
            Event::BatchCommitted { bookings } => {
                for booking in bookings {
                    self.apply_booking(booking, locks);
                }
            }
            Event::BookingCancelled { id, adjustment } => {
                self.close_booking(*id, BookingStatus::Cancelled, locks);
                self.adjustments.append(adjustment.clone());
            }
            Event::BookingSuperseded {
                old_id,
                replacement,
                adjustment,
            } => {
                self.close_booking(*old_id, BookingStatus::Superseded, locks);
                self.apply_booking(replacement, locks);
                self.adjustments.append(adjustment.clone());
            }
            Event::AdjustmentRecorded { adjustment } => {
                self.adjustments.append(adjustment.clone());
            }
            Event::ResourceUpdated {
                key,
                name,
                capacity,
            } => {
                if let Some(rs) = locks.get_mut(key) {
                    rs.name = name.clone();
                    rs.capacity = *capacity;
                }
            }
            Event::ResourceRegistered {
                key,
                name,
                capacity,
            } => {
                let rs = ResourceState::new(*key, name.clone(), *capacity);
                self.resources.insert(*key, Arc::new(RwLock::new(rs)));
            }
            Event::ResourceRetired { key } => {
                if let Some(rs) = locks.get_mut(key) {
                    rs.retired = true;
                }
                self.resources.remove(key);
            }
        }
    }

    fn apply_booking(&self, booking: &Booking, locks: &mut LockSet) {
        if booking.is_scheduled() {
            for key in booking.resources.keys() {
                if let Some(rs) = locks.get_mut(&key) {
                    rs.insert_entry(Entry {
                        booking_id: booking.id,
                        slot: booking.slot,
                    });
                }
            }
        }
        self.bookings.insert(booking.id, booking.clone());
    }

    fn close_booking(&self, id: Ulid, status: BookingStatus, locks: &mut LockSet) {
        let resources = match self.bookings.get_mut(&id) {
            Some(mut booking) => {
                booking.status = status;
                booking.resources
            }
            None => return,
        };
        for key in resources.keys() {
            if let Some(rs) = locks.get_mut(&key) {
                rs.remove_entry(id);
            }
        }
    }
}
