use chrono::Utc;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NoticeKind;
use crate::observability;

use super::conflict::{
    check_capacity, check_entry_limit, first_conflict, validate_slot, validate_text,
};
use super::{Engine, EngineError, LockSet};

/// What a superseding mutation changes on the booking.
#[derive(Debug, Clone, Copy)]
enum Change {
    Slot(TemporalSlot),
    Resource(ResourceKey),
}

impl Engine {
    /// Commit a regular timetable entry. Room, teacher and group stay
    /// write-locked from the conflict check until the journal write is applied.
    pub async fn commit(&self, new: NewBooking) -> Result<Ulid, EngineError> {
        validate_slot(&new.slot)?;
        self.commit_one(new.into_booking(None)).await
    }

    /// Commit a makeup session (rattrapage). When `original_booking` is given
    /// it must exist and no longer be scheduled.
    pub async fn schedule_makeup(&self, new: NewMakeup, author: &str) -> Result<Ulid, EngineError> {
        validate_slot(&new.slot)?;
        validate_text(Some(&new.reason), MAX_REASON_LEN, "reason too long")?;
        validate_text(Some(author), MAX_AUTHOR_LEN, "author too long")?;
        if let Some(original) = new.original_booking {
            match self.bookings.get(&original) {
                None => return Err(EngineError::NotFound(original)),
                Some(b) if b.is_scheduled() => return Err(EngineError::StillScheduled(original)),
                Some(_) => {}
            }
        }

        let details = MakeupDetails {
            reason: new.reason,
            authored_by: author.to_string(),
            original_booking: new.original_booking,
            related_event: new.related_event,
        };
        let booking = NewBooking {
            id: new.id,
            subject_id: new.subject_id,
            resources: new.resources,
            slot: new.slot,
        }
        .into_booking(Some(details));
        self.commit_one(booking).await
    }

    async fn commit_one(&self, booking: Booking) -> Result<Ulid, EngineError> {
        if self.bookings.contains_key(&booking.id) {
            return Err(EngineError::DuplicateBooking(booking.id));
        }
        let mut locks = self.lock_keys(booking.resources.keys()).await?;
        if self.bookings.contains_key(&booking.id) {
            return Err(EngineError::DuplicateBooking(booking.id));
        }
        check_capacity(&locks, &booking.resources)?;
        check_entry_limit(&locks)?;

        let conflict = {
            let states: Vec<&ResourceState> = locks.states().collect();
            first_conflict(&states, &Proposal::from(&booking), None)
        };
        if let Some(conflict) = conflict {
            return Err(self.reject(locks, conflict, &booking));
        }

        let id = booking.id;
        let event = Event::BookingCommitted { booking };
        self.persist_and_apply(&event, &mut locks).await?;
        drop(locks);

        if let Event::BookingCommitted { booking } = &event {
            self.emit(NoticeKind::BookingCreated, booking);
            debug!("committed {id} at {}", booking.slot);
        }
        metrics::counter!(observability::BOOKINGS_COMMITTED_TOTAL).increment(1);
        Ok(id)
    }

    /// Atomically commit several bookings, e.g. a weekly timetable. All or
    /// nothing: a conflict with the ledger or between two batch members
    /// rejects the whole batch. Bookings may span any set of resources.
    pub async fn commit_batch(&self, batch: Vec<NewBooking>) -> Result<Vec<Ulid>, EngineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for (i, new) in batch.iter().enumerate() {
            validate_slot(&new.slot)?;
            if batch[..i].iter().any(|other| other.id == new.id) {
                return Err(EngineError::DuplicateBooking(new.id));
            }
        }

        let bookings: Vec<Booking> = batch.into_iter().map(|b| b.into_booking(None)).collect();
        let mut locks = self
            .lock_keys(bookings.iter().flat_map(|b| b.resources.keys()))
            .await?;
        check_entry_limit(&locks)?;

        // Phase 1: every member against the ledger and against earlier members.
        let rejected = {
            let states: Vec<&ResourceState> = locks.states().collect();
            let mut rejected = None;
            for (i, booking) in bookings.iter().enumerate() {
                if self.bookings.contains_key(&booking.id) {
                    return Err(EngineError::DuplicateBooking(booking.id));
                }
                check_capacity(&locks, &booking.resources)?;
                let proposal = Proposal::from(booking);
                if let Some(conflict) = first_conflict(&states, &proposal, None) {
                    rejected = Some((conflict, booking));
                    break;
                }
                let earlier = bookings[..i]
                    .iter()
                    .filter(|other| other.slot.overlaps(&booking.slot))
                    .filter_map(|other| {
                        booking
                            .resources
                            .shares_key_with(&other.resources)
                            .map(|key| Conflict {
                                kind: key.kind,
                                resource_id: key.id,
                                booking_id: other.id,
                            })
                    })
                    .min_by_key(|c| c.kind);
                if let Some(conflict) = earlier {
                    rejected = Some((conflict, booking));
                    break;
                }
            }
            rejected
        };
        if let Some((conflict, booking)) = rejected {
            return Err(self.reject(locks, conflict, booking));
        }

        // Phase 2: one journal record for the whole batch.
        let ids: Vec<Ulid> = bookings.iter().map(|b| b.id).collect();
        let event = Event::BatchCommitted { bookings };
        self.persist_and_apply(&event, &mut locks).await?;
        drop(locks);

        if let Event::BatchCommitted { bookings } = &event {
            for booking in bookings {
                self.emit(NoticeKind::BookingCreated, booking);
            }
        }
        metrics::counter!(observability::BOOKINGS_COMMITTED_TOTAL).increment(ids.len() as u64);
        info!("committed batch of {} bookings", ids.len());
        Ok(ids)
    }

    /// Cancel a scheduled booking. The row stays, with status `Cancelled` and
    /// a `Cancellation` adjustment.
    pub async fn cancel(
        &self,
        id: Ulid,
        reason: Option<String>,
        author: &str,
    ) -> Result<(), EngineError> {
        validate_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        validate_text(Some(author), MAX_AUTHOR_LEN, "author too long")?;
        let current = self.scheduled_booking(&id)?;

        let mut locks = self.lock_keys(current.resources.keys()).await?;
        // Status may have moved while we waited for the locks.
        let current = self.scheduled_booking(&id)?;

        let mut after = current.snapshot();
        after.status = BookingStatus::Cancelled;
        let adjustment = Adjustment::new(
            AdjustmentKind::Cancellation,
            current.snapshot(),
            after,
            reason,
            author,
        );
        let event = Event::BookingCancelled { id, adjustment };
        self.persist_and_apply(&event, &mut locks).await?;
        drop(locks);

        self.emit(NoticeKind::BookingCancelled, &current);
        metrics::counter!(observability::CANCELLATIONS_TOTAL).increment(1);
        metrics::counter!(observability::ADJUSTMENTS_TOTAL, "kind" => AdjustmentKind::Cancellation.as_str())
            .increment(1);
        debug!("cancelled {id} by {author}");
        Ok(())
    }

    /// Move a booking to another slot. The old entry becomes `Superseded` and a
    /// replacement with a fresh id is committed, in one journal record. The
    /// old entry does not conflict with its own replacement.
    pub async fn reschedule(
        &self,
        id: Ulid,
        new_slot: TemporalSlot,
        reason: Option<String>,
        author: &str,
    ) -> Result<Ulid, EngineError> {
        self.supersede(id, Change::Slot(new_slot), reason, author)
            .await
    }

    /// Swap one resource of a booking (room change, substitute teacher, ...).
    /// Same mechanics as `reschedule`.
    pub async fn reassign(
        &self,
        id: Ulid,
        new_resource: ResourceKey,
        reason: Option<String>,
        author: &str,
    ) -> Result<Ulid, EngineError> {
        self.supersede(id, Change::Resource(new_resource), reason, author)
            .await
    }

    async fn supersede(
        &self,
        id: Ulid,
        change: Change,
        reason: Option<String>,
        author: &str,
    ) -> Result<Ulid, EngineError> {
        validate_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        validate_text(Some(author), MAX_AUTHOR_LEN, "author too long")?;
        if let Change::Slot(slot) = &change {
            validate_slot(slot)?;
        }
        let current = self.scheduled_booking(&id)?;

        let (resources, slot, kind) = match change {
            Change::Slot(slot) => (current.resources, slot, AdjustmentKind::Reschedule),
            Change::Resource(key) => (
                current.resources.with(key),
                current.slot,
                AdjustmentKind::for_resource(key.kind),
            ),
        };
        if resources == current.resources && slot == current.slot {
            return Err(EngineError::Unchanged(id));
        }

        let mut locks = self
            .lock_keys(current.resources.keys().into_iter().chain(resources.keys()))
            .await?;
        let current = self.scheduled_booking(&id)?;

        check_capacity(&locks, &resources)?;
        if let Change::Resource(key) = change
            && locks
                .get(&key)
                .is_some_and(|rs| rs.entries.len() >= MAX_ENTRIES_PER_RESOURCE)
        {
            return Err(EngineError::LimitExceeded("too many bookings on resource"));
        }
        let proposal = Proposal { resources, slot };
        let conflict = {
            let states: Vec<&ResourceState> = locks.states().collect();
            first_conflict(&states, &proposal, Some(id))
        };
        if let Some(conflict) = conflict {
            return Err(self.reject(locks, conflict, &current));
        }

        let replacement = Booking {
            id: Ulid::new(),
            subject_id: current.subject_id,
            resources,
            slot,
            status: BookingStatus::Scheduled,
            makeup: current.makeup.clone(),
            supersedes: Some(id),
            created_at: Utc::now(),
        };
        let adjustment = Adjustment::new(
            kind,
            current.snapshot(),
            replacement.snapshot(),
            reason,
            author,
        );
        let new_id = replacement.id;
        let event = Event::BookingSuperseded {
            old_id: id,
            replacement,
            adjustment,
        };
        self.persist_and_apply(&event, &mut locks).await?;
        drop(locks);

        self.emit(NoticeKind::BookingCancelled, &current);
        if let Event::BookingSuperseded { replacement, .. } = &event {
            self.emit(NoticeKind::BookingCreated, replacement);
        }
        metrics::counter!(observability::ADJUSTMENTS_TOTAL, "kind" => kind.as_str()).increment(1);
        debug!("{kind}: {id} superseded by {new_id}");
        Ok(new_id)
    }

    /// Clone of a booking that must still be scheduled.
    fn scheduled_booking(&self, id: &Ulid) -> Result<Booking, EngineError> {
        let booking = self
            .bookings
            .get(id)
            .map(|b| b.clone())
            .ok_or(EngineError::NotFound(*id))?;
        if !booking.is_scheduled() {
            return Err(EngineError::NotScheduled(*id));
        }
        Ok(booking)
    }

    /// Release the locks, report a rejected proposal and build the error for
    /// the caller.
    fn reject(&self, locks: LockSet, conflict: Conflict, booking: &Booking) -> EngineError {
        drop(locks);
        warn!("rejected {} at {}: {conflict}", booking.id, booking.slot);
        metrics::counter!(observability::CONFLICTS_REJECTED_TOTAL, "kind" => conflict.kind.as_str())
            .increment(1);
        self.emit(NoticeKind::ConflictRejected, booking);
        EngineError::Conflict(conflict)
    }

    /// Rewrite the journal with only the records needed to recreate the
    /// current state: resources, every booking with its status, every
    /// adjustment. Mutations wait at the gate while this runs.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;

        let handles: Vec<_> = self.resources.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::with_capacity(handles.len() + self.bookings.len());
        for rs in handles {
            let guard = rs.read().await;
            events.push(Event::ResourceRegistered {
                key: guard.key,
                name: guard.name.clone(),
                capacity: guard.capacity,
            });
        }

        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        events.extend(
            bookings
                .into_iter()
                .map(|booking| Event::BookingCommitted { booking }),
        );
        events.extend(
            self.adjustments
                .all()
                .into_iter()
                .map(|adjustment| Event::AdjustmentRecorded { adjustment }),
        );

        let count = events.len();
        self.journal.compact(events).await?;
        info!("compacted journal to {count} records");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }
}
