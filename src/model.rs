use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Half-open time-of-day interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidSlot { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// A date-bound `[start, end)` interval. Slots on different dates never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemporalSlot {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TemporalSlot {
    pub fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidSlot { start, end });
        }
        Ok(Self { date, start, end })
    }

    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &TemporalSlot) -> bool {
        self.date == other.date && self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        instant.date() == self.date && self.range().contains(instant.time())
    }
}

impl fmt::Display for TemporalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.date,
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

// ── Resources ────────────────────────────────────────────────────

/// Bookable resource kinds. The derived order (room, teacher, group) is the
/// conflict report order and the lock acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Room,
    Teacher,
    Group,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Room, ResourceKind::Teacher, ResourceKind::Group];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Room => "room",
            ResourceKind::Teacher => "teacher",
            ResourceKind::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "room" | "rooms" => Some(ResourceKind::Room),
            "teacher" | "teachers" => Some(ResourceKind::Teacher),
            "group" | "groups" => Some(ResourceKind::Group),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub id: i64,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn room(id: i64) -> Self {
        Self::new(ResourceKind::Room, id)
    }

    pub fn teacher(id: i64) -> Self {
        Self::new(ResourceKind::Teacher, id)
    }

    pub fn group(id: i64) -> Self {
        Self::new(ResourceKind::Group, id)
    }

    /// Parse a notification channel name such as `room_12`.
    pub fn from_channel(channel: &str) -> Option<Self> {
        let (kind, id) = channel.split_once('_')?;
        Some(Self::new(ResourceKind::parse(kind)?, id.parse().ok()?))
    }
}

/// Formats as the notification channel name, e.g. `teacher_7`.
impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.id)
    }
}

/// The room, teacher and group a booking occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSet {
    pub room_id: i64,
    pub teacher_id: i64,
    pub group_id: i64,
}

impl ResourceSet {
    pub fn new(room_id: i64, teacher_id: i64, group_id: i64) -> Self {
        Self {
            room_id,
            teacher_id,
            group_id,
        }
    }

    /// Keys in kind order.
    pub fn keys(&self) -> [ResourceKey; 3] {
        [
            ResourceKey::room(self.room_id),
            ResourceKey::teacher(self.teacher_id),
            ResourceKey::group(self.group_id),
        ]
    }

    pub fn get(&self, kind: ResourceKind) -> i64 {
        match kind {
            ResourceKind::Room => self.room_id,
            ResourceKind::Teacher => self.teacher_id,
            ResourceKind::Group => self.group_id,
        }
    }

    pub fn with(mut self, key: ResourceKey) -> Self {
        match key.kind {
            ResourceKind::Room => self.room_id = key.id,
            ResourceKind::Teacher => self.teacher_id = key.id,
            ResourceKind::Group => self.group_id = key.id,
        }
        self
    }

    pub fn shares_key_with(&self, other: &ResourceSet) -> Option<ResourceKey> {
        self.keys()
            .into_iter()
            .find(|key| other.get(key.kind) == key.id)
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Scheduled,
    Cancelled,
    Superseded,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Superseded => "superseded",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra fields carried by a makeup session (rattrapage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeupDetails {
    pub reason: String,
    pub authored_by: String,
    pub original_booking: Option<Ulid>,
    pub related_event: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub subject_id: i64,
    pub resources: ResourceSet,
    pub slot: TemporalSlot,
    pub status: BookingStatus,
    pub makeup: Option<MakeupDetails>,
    /// Booking this one replaced through a reschedule or reassignment.
    pub supersedes: Option<Ulid>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_scheduled(&self) -> bool {
        self.status == BookingStatus::Scheduled
    }

    pub fn is_makeup(&self) -> bool {
        self.makeup.is_some()
    }

    pub fn snapshot(&self) -> BookingSnapshot {
        BookingSnapshot {
            booking_id: self.id,
            subject_id: self.subject_id,
            resources: self.resources,
            slot: self.slot,
            status: self.status,
        }
    }
}

/// Request to commit a regular timetable entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub subject_id: i64,
    pub resources: ResourceSet,
    pub slot: TemporalSlot,
}

impl NewBooking {
    pub(crate) fn into_booking(self, makeup: Option<MakeupDetails>) -> Booking {
        Booking {
            id: self.id,
            subject_id: self.subject_id,
            resources: self.resources,
            slot: self.slot,
            status: BookingStatus::Scheduled,
            makeup,
            supersedes: None,
            created_at: Utc::now(),
        }
    }
}

/// Request to schedule a makeup session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMakeup {
    pub id: Ulid,
    pub subject_id: i64,
    pub resources: ResourceSet,
    pub slot: TemporalSlot,
    pub reason: String,
    pub original_booking: Option<Ulid>,
    pub related_event: Option<i64>,
}

/// A slot and resource set to test against the ledger without committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub resources: ResourceSet,
    pub slot: TemporalSlot,
}

impl From<&Booking> for Proposal {
    fn from(b: &Booking) -> Self {
        Self {
            resources: b.resources,
            slot: b.slot,
        }
    }
}

/// One committed entry blocking a proposal on one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ResourceKind,
    pub resource_id: i64,
    pub booking_id: Ulid,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} already booked by {}",
            self.kind, self.resource_id, self.booking_id
        )
    }
}

// ── Adjustments ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdjustmentKind {
    Reschedule,
    Cancellation,
    RoomChange,
    TeacherChange,
    GroupChange,
}

impl AdjustmentKind {
    pub fn for_resource(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Room => AdjustmentKind::RoomChange,
            ResourceKind::Teacher => AdjustmentKind::TeacherChange,
            ResourceKind::Group => AdjustmentKind::GroupChange,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentKind::Reschedule => "reschedule",
            AdjustmentKind::Cancellation => "cancellation",
            AdjustmentKind::RoomChange => "room_change",
            AdjustmentKind::TeacherChange => "teacher_change",
            AdjustmentKind::GroupChange => "group_change",
        }
    }
}

impl fmt::Display for AdjustmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSnapshot {
    pub booking_id: Ulid,
    pub subject_id: i64,
    pub resources: ResourceSet,
    pub slot: TemporalSlot,
    pub status: BookingStatus,
}

/// Immutable audit record of a change applied to a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: Ulid,
    pub target: Ulid,
    pub kind: AdjustmentKind,
    pub before: BookingSnapshot,
    pub after: BookingSnapshot,
    pub reason: Option<String>,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

impl Adjustment {
    pub fn new(
        kind: AdjustmentKind,
        before: BookingSnapshot,
        after: BookingSnapshot,
        reason: Option<String>,
        author: &str,
    ) -> Self {
        Self {
            id: Ulid::new(),
            target: before.booking_id,
            kind,
            before,
            after,
            reason,
            author: author.to_string(),
            created_at: Utc::now(),
        }
    }
}

// ── Per-resource index ───────────────────────────────────────────

/// A scheduled booking as seen from one of its resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub booking_id: Ulid,
    pub slot: TemporalSlot,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub key: ResourceKey,
    pub name: Option<String>,
    /// Seats for a room, head-count for a group. `None` means unbounded.
    pub capacity: Option<u32>,
    /// Set under the write lock before the resource leaves the registry, so a
    /// caller that cloned the handle earlier cannot book into it.
    pub retired: bool,
    /// Scheduled entries only, sorted by `(date, start)`.
    pub entries: Vec<Entry>,
}

impl ResourceState {
    pub fn new(key: ResourceKey, name: Option<String>, capacity: Option<u32>) -> Self {
        Self {
            key,
            name,
            capacity,
            retired: false,
            entries: Vec::new(),
        }
    }

    /// Insert entry maintaining sort order by `(date, start)`.
    pub fn insert_entry(&mut self, entry: Entry) {
        let sort_key = (entry.slot.date, entry.slot.start);
        let pos = self
            .entries
            .binary_search_by_key(&sort_key, |e| (e.slot.date, e.slot.start))
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn remove_entry(&mut self, booking_id: Ulid) -> Option<Entry> {
        let pos = self.entries.iter().position(|e| e.booking_id == booking_id)?;
        Some(self.entries.remove(pos))
    }

    /// Entries on `date`, in start order.
    pub fn on_date(&self, date: NaiveDate) -> &[Entry] {
        let lo = self.entries.partition_point(|e| e.slot.date < date);
        let hi = self.entries.partition_point(|e| e.slot.date <= date);
        &self.entries[lo..hi]
    }

    /// Entries whose slot overlaps `query`. Binary search skips other dates
    /// and everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &TemporalSlot) -> impl Iterator<Item = &Entry> {
        let lo = self.entries.partition_point(|e| e.slot.date < query.date);
        let hi = self
            .entries
            .partition_point(|e| (e.slot.date, e.slot.start) < (query.date, query.end));
        self.entries[lo..hi.max(lo)]
            .iter()
            .filter(move |e| e.slot.end > query.start)
    }
}

// ── Journal records ──────────────────────────────────────────────

/// Journal record format, one record per atomic ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        key: ResourceKey,
        name: Option<String>,
        capacity: Option<u32>,
    },
    ResourceUpdated {
        key: ResourceKey,
        name: Option<String>,
        capacity: Option<u32>,
    },
    ResourceRetired {
        key: ResourceKey,
    },
    /// Also used by compaction to restore cancelled and superseded rows.
    BookingCommitted {
        booking: Booking,
    },
    BatchCommitted {
        bookings: Vec<Booking>,
    },
    BookingCancelled {
        id: Ulid,
        adjustment: Adjustment,
    },
    BookingSuperseded {
        old_id: Ulid,
        replacement: Booking,
        adjustment: Adjustment,
    },
    AdjustmentRecorded {
        adjustment: Adjustment,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub key: ResourceKey,
    pub name: Option<String>,
    pub capacity: Option<u32>,
    pub scheduled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn slot(day: u32, start: (u32, u32), end: (u32, u32)) -> TemporalSlot {
        TemporalSlot::new(d(day), t(start.0, start.1), t(end.0, end.1)).unwrap()
    }

    fn entry(day: u32, start: (u32, u32), end: (u32, u32)) -> Entry {
        Entry {
            booking_id: Ulid::new(),
            slot: slot(day, start, end),
        }
    }

    #[test]
    fn slot_rejects_inverted_and_empty_ranges() {
        assert!(matches!(
            TemporalSlot::new(d(3), t(10, 0), t(8, 30)),
            Err(EngineError::InvalidSlot { .. })
        ));
        assert!(matches!(
            TemporalSlot::new(d(3), t(10, 0), t(10, 0)),
            Err(EngineError::InvalidSlot { .. })
        ));
    }

    #[test]
    fn slot_overlap() {
        let a = slot(3, (8, 30), (10, 0));
        let b = slot(3, (9, 0), (10, 30));
        let c = slot(3, (10, 0), (11, 30));
        let other_day = slot(4, (8, 30), (10, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!a.overlaps(&other_day));
    }

    #[test]
    fn slot_contains_instant() {
        let s = slot(3, (8, 30), (10, 0));
        assert!(s.contains(d(3).and_time(t(8, 30))));
        assert!(s.contains(d(3).and_time(t(9, 59))));
        assert!(!s.contains(d(3).and_time(t(10, 0)))); // half-open
        assert!(!s.contains(d(4).and_time(t(9, 0))));
    }

    #[test]
    fn slot_duration_and_display() {
        let s = slot(3, (8, 30), (10, 0));
        assert_eq!(s.duration_minutes(), 90);
        assert_eq!(s.to_string(), "2025-03-03 08:30-10:00");
    }

    #[test]
    fn resource_kind_order_is_room_teacher_group() {
        let mut kinds = vec![ResourceKind::Group, ResourceKind::Room, ResourceKind::Teacher];
        kinds.sort();
        assert_eq!(kinds, ResourceKind::ALL.to_vec());
    }

    #[test]
    fn resource_key_channel_names() {
        let key = ResourceKey::teacher(7);
        assert_eq!(key.to_string(), "teacher_7");
        assert_eq!(ResourceKey::from_channel("teacher_7"), Some(key));
        assert_eq!(ResourceKey::from_channel("group_x"), None);
        assert_eq!(ResourceKey::from_channel("bogus_1"), None);
    }

    #[test]
    fn resource_set_with_replaces_one_kind() {
        let set = ResourceSet::new(1, 2, 3);
        let moved = set.with(ResourceKey::room(9));
        assert_eq!(moved, ResourceSet::new(9, 2, 3));
        assert_eq!(set.shares_key_with(&moved), Some(ResourceKey::teacher(2)));
        assert_eq!(set.shares_key_with(&ResourceSet::new(4, 5, 6)), None);
    }

    #[test]
    fn entries_stay_sorted_by_date_then_start() {
        let mut rs = ResourceState::new(ResourceKey::room(1), None, None);
        rs.insert_entry(entry(4, (8, 0), (9, 0)));
        rs.insert_entry(entry(3, (14, 0), (15, 0)));
        rs.insert_entry(entry(3, (8, 0), (9, 0)));
        let order: Vec<_> = rs.entries.iter().map(|e| (e.slot.date, e.slot.start)).collect();
        assert_eq!(
            order,
            vec![(d(3), t(8, 0)), (d(3), t(14, 0)), (d(4), t(8, 0))]
        );
    }

    #[test]
    fn remove_entry_by_booking() {
        let mut rs = ResourceState::new(ResourceKey::room(1), None, None);
        let e = entry(3, (8, 0), (9, 0));
        rs.insert_entry(e);
        assert_eq!(rs.remove_entry(Ulid::new()), None);
        assert_eq!(rs.remove_entry(e.booking_id), Some(e));
        assert!(rs.entries.is_empty());
    }

    #[test]
    fn overlapping_only_same_date() {
        let mut rs = ResourceState::new(ResourceKey::room(1), None, None);
        rs.insert_entry(entry(2, (9, 0), (10, 0)));
        rs.insert_entry(entry(3, (9, 0), (10, 0)));
        rs.insert_entry(entry(4, (9, 0), (10, 0)));
        let hits: Vec<_> = rs.overlapping(&slot(3, (9, 30), (11, 0))).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slot.date, d(3));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = ResourceState::new(ResourceKey::room(1), None, None);
        rs.insert_entry(entry(3, (8, 30), (10, 0)));
        rs.insert_entry(entry(3, (11, 30), (13, 0)));
        let hits: Vec<_> = rs.overlapping(&slot(3, (10, 0), (11, 30))).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_long_entry_spanning_query() {
        let mut rs = ResourceState::new(ResourceKey::room(1), None, None);
        rs.insert_entry(entry(3, (8, 0), (18, 0)));
        let hits: Vec<_> = rs.overlapping(&slot(3, (12, 0), (12, 30))).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn on_date_slices_one_day() {
        let mut rs = ResourceState::new(ResourceKey::group(1), None, None);
        rs.insert_entry(entry(3, (8, 0), (9, 0)));
        rs.insert_entry(entry(3, (10, 0), (11, 0)));
        rs.insert_entry(entry(5, (8, 0), (9, 0)));
        assert_eq!(rs.on_date(d(3)).len(), 2);
        assert!(rs.on_date(d(4)).is_empty());
        assert_eq!(rs.on_date(d(5)).len(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let booking = NewBooking {
            id: Ulid::new(),
            subject_id: 12,
            resources: ResourceSet::new(101, 7, 3),
            slot: slot(3, (8, 30), (10, 0)),
        }
        .into_booking(None);
        let event = Event::BookingCommitted { booking };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
