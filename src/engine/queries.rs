use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{busy_within, common_free};
use super::{Engine, EngineError};

impl Engine {
    /// A booking in whatever status it is now.
    pub fn booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|b| b.clone())
    }

    /// Scheduled bookings of one resource, by date then start, optionally
    /// limited to one date.
    pub async fn timetable(
        &self,
        key: ResourceKey,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, EngineError> {
        let guards = self.read_keys([key]).await?;
        let Some(rs) = guards.first() else {
            return Ok(Vec::new());
        };
        let entries = match date {
            Some(date) => rs.on_date(date),
            None => &rs.entries[..],
        };
        Ok(entries
            .iter()
            .filter_map(|e| self.booking(&e.booking_id))
            .collect())
    }

    /// Makeup sessions in every status, oldest first, optionally for one group.
    pub fn makeup_sessions(&self, group_id: Option<i64>) -> Vec<Booking> {
        let mut sessions: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| e.is_makeup())
            .filter(|e| group_id.is_none_or(|g| e.resources.group_id == g))
            .map(|e| e.value().clone())
            .collect();
        sessions.sort_by(|a, b| {
            (a.slot.date, a.slot.start, a.id).cmp(&(b.slot.date, b.slot.start, b.id))
        });
        sessions
    }

    /// Free ranges of one resource on `date` inside `within`.
    pub async fn free_slots(
        &self,
        key: ResourceKey,
        date: NaiveDate,
        within: TimeRange,
        min_minutes: Option<i64>,
    ) -> Result<Vec<TimeRange>, EngineError> {
        self.common_free_slots(&[key], date, within, min_minutes)
            .await
    }

    /// Ranges on `date` inside `within` where every listed resource is free,
    /// e.g. to offer alternatives after a conflict or to place a makeup.
    pub async fn common_free_slots(
        &self,
        keys: &[ResourceKey],
        date: NaiveDate,
        within: TimeRange,
        min_minutes: Option<i64>,
    ) -> Result<Vec<TimeRange>, EngineError> {
        let within = TimeRange::new(within.start, within.end)?;
        if keys.is_empty() {
            return Ok(vec![within]);
        }
        if keys.len() > MAX_IN_CLAUSE_IDS {
            return Err(EngineError::LimitExceeded("too many resources in query"));
        }
        let guards = self.read_keys(keys.iter().copied()).await?;
        let busy: Vec<Vec<TimeRange>> = guards
            .iter()
            .map(|rs| busy_within(rs.on_date(date), &within))
            .collect();
        Ok(common_free(&busy, within, min_minutes))
    }
}
