use chrono::NaiveTime;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Conflict, ResourceKey};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid slot: start {start} must be before end {end}")]
    InvalidSlot { start: NaiveTime, end: NaiveTime },
    #[error("unknown resource: {0}")]
    UnknownResource(ResourceKey),
    #[error("conflict: {0}")]
    Conflict(Conflict),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("already exists: {0}")]
    AlreadyExists(ResourceKey),
    #[error("booking id already used: {0}")]
    DuplicateBooking(Ulid),
    #[error("room {room_id} seats {capacity}, group needs {needed}")]
    CapacityExceeded { room_id: i64, capacity: u32, needed: u32 },
    #[error("booking {0} is not scheduled")]
    NotScheduled(Ulid),
    #[error("original booking {0} is still scheduled")]
    StillScheduled(Ulid),
    #[error("booking {0} already has that slot and resources")]
    Unchanged(Ulid),
    #[error("resource {0} still has scheduled bookings")]
    InUse(ResourceKey),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl EngineError {
    /// Everything except storage faults is the caller's to fix (or, for
    /// conflicts, to retry with another slot).
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, EngineError::Storage(_))
    }
}
