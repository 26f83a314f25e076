use chrono::Datelike;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, LockSet};

/// Centralised slot validation; every entry point runs it, whatever built the slot.
pub(crate) fn validate_slot(slot: &TemporalSlot) -> Result<(), EngineError> {
    if slot.start >= slot.end {
        return Err(EngineError::InvalidSlot {
            start: slot.start,
            end: slot.end,
        });
    }
    let year = slot.date.year();
    if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&year) {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

pub(crate) fn validate_text(
    text: Option<&str>,
    max: usize,
    what: &'static str,
) -> Result<(), EngineError> {
    match text {
        Some(t) if t.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

/// Conflicts of `proposal` against one resource's scheduled entries.
fn conflicts_on<'a>(
    rs: &'a ResourceState,
    slot: &'a TemporalSlot,
    exclude: Option<Ulid>,
) -> impl Iterator<Item = Conflict> + 'a {
    rs.overlapping(slot)
        .filter(move |e| Some(e.booking_id) != exclude)
        .map(|e| Conflict {
            kind: rs.key.kind,
            resource_id: rs.key.id,
            booking_id: e.booking_id,
        })
}

fn proposal_states<'a>(
    states: &[&'a ResourceState],
    proposal: &Proposal,
) -> Vec<&'a ResourceState> {
    proposal
        .resources
        .keys()
        .iter()
        .filter_map(|key| states.iter().find(|rs| rs.key == *key).copied())
        .collect()
}

/// Every conflict of `proposal`, room first, then teacher, then group; within
/// a resource by start time. `states` must include the proposal's resources.
pub fn detect(
    states: &[&ResourceState],
    proposal: &Proposal,
    exclude: Option<Ulid>,
) -> Vec<Conflict> {
    proposal_states(states, proposal)
        .into_iter()
        .flat_map(|rs| conflicts_on(rs, &proposal.slot, exclude).collect::<Vec<_>>())
        .collect()
}

/// First conflict in the same order as `detect`, without scanning the rest.
pub fn first_conflict(
    states: &[&ResourceState],
    proposal: &Proposal,
    exclude: Option<Ulid>,
) -> Option<Conflict> {
    proposal_states(states, proposal)
        .into_iter()
        .find_map(|rs| conflicts_on(rs, &proposal.slot, exclude).next())
}

/// Group head-count must fit in the room. Unbounded on either side passes.
pub(crate) fn check_capacity(locks: &LockSet, resources: &ResourceSet) -> Result<(), EngineError> {
    let room = locks.get(&ResourceKey::room(resources.room_id));
    let group = locks.get(&ResourceKey::group(resources.group_id));
    if let (Some(capacity), Some(needed)) = (
        room.and_then(|rs| rs.capacity),
        group.and_then(|rs| rs.capacity),
    ) && needed > capacity
    {
        return Err(EngineError::CapacityExceeded {
            room_id: resources.room_id,
            capacity,
            needed,
        });
    }
    Ok(())
}

pub(crate) fn check_entry_limit(locks: &LockSet) -> Result<(), EngineError> {
    if locks
        .states()
        .any(|rs| rs.entries.len() >= MAX_ENTRIES_PER_RESOURCE)
    {
        return Err(EngineError::LimitExceeded("too many bookings on resource"));
    }
    Ok(())
}

impl Engine {
    /// First conflict `proposal` would hit, or `None` if it is clear.
    /// `exclude` ignores one booking, typically the one being moved.
    pub async fn check(
        &self,
        proposal: &Proposal,
        exclude: Option<Ulid>,
    ) -> Result<Option<Conflict>, EngineError> {
        validate_slot(&proposal.slot)?;
        let guards = self.read_keys(proposal.resources.keys()).await?;
        let states: Vec<&ResourceState> = guards.iter().map(|g| &**g).collect();
        Ok(first_conflict(&states, proposal, exclude))
    }

    /// Every independent conflict `proposal` would hit.
    pub async fn check_all(
        &self,
        proposal: &Proposal,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Conflict>, EngineError> {
        validate_slot(&proposal.slot)?;
        let guards = self.read_keys(proposal.resources.keys()).await?;
        let states: Vec<&ResourceState> = guards.iter().map(|g| &**g).collect();
        Ok(detect(&states, proposal, exclude))
    }
}
