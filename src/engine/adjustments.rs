use dashmap::DashMap;
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_text;
use super::{Engine, EngineError};

/// Append-only audit log, indexed by the booking each record targets.
#[derive(Default)]
pub struct AdjustmentLog {
    by_target: DashMap<Ulid, Vec<Adjustment>>,
}

impl AdjustmentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&self, adjustment: Adjustment) {
        self.by_target
            .entry(adjustment.target)
            .or_default()
            .push(adjustment);
    }

    /// Adjustments of one booking, newest first.
    pub fn history(&self, booking_id: &Ulid) -> Vec<Adjustment> {
        self.by_target
            .get(booking_id)
            .map(|list| list.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Adjustments authored by `author`, newest first.
    pub fn by_author(&self, author: &str) -> Vec<Adjustment> {
        let mut found: Vec<Adjustment> = self
            .by_target
            .iter()
            .flat_map(|e| {
                e.value()
                    .iter()
                    .filter(|a| a.author == author)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        found
    }

    /// Every record, oldest first.
    pub fn all(&self) -> Vec<Adjustment> {
        let mut all: Vec<Adjustment> = self
            .by_target
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn len(&self) -> usize {
        self.by_target.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Engine {
    /// Journal a free-standing adjustment against an existing booking. Ledger
    /// mutations record their own adjustments; this is for exceptions decided
    /// outside the ledger.
    pub async fn record_adjustment(
        &self,
        kind: AdjustmentKind,
        before: BookingSnapshot,
        after: BookingSnapshot,
        reason: Option<String>,
        author: &str,
    ) -> Result<Ulid, EngineError> {
        validate_text(reason.as_deref(), MAX_REASON_LEN, "reason too long")?;
        validate_text(Some(author), MAX_AUTHOR_LEN, "author too long")?;
        if !self.bookings.contains_key(&before.booking_id) {
            return Err(EngineError::NotFound(before.booking_id));
        }

        let mut locks = self.lock_keys([]).await?;
        let adjustment = Adjustment::new(kind, before, after, reason, author);
        let id = adjustment.id;
        let event = Event::AdjustmentRecorded { adjustment };
        self.persist_and_apply(&event, &mut locks).await?;
        metrics::counter!(crate::observability::ADJUSTMENTS_TOTAL, "kind" => kind.as_str())
            .increment(1);
        debug!("recorded {kind} adjustment {id}");
        Ok(id)
    }

    pub fn history(&self, booking_id: &Ulid) -> Vec<Adjustment> {
        self.adjustments.history(booking_id)
    }

    pub fn adjustments_by(&self, author: &str) -> Vec<Adjustment> {
        self.adjustments.by_author(author)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn snapshot(id: Ulid, hour: u32, status: BookingStatus) -> BookingSnapshot {
        BookingSnapshot {
            booking_id: id,
            subject_id: 1,
            resources: ResourceSet::new(1, 2, 3),
            slot: TemporalSlot::new(
                NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
                NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
            )
            .unwrap(),
            status,
        }
    }

    #[test]
    fn history_is_newest_first() {
        let log = AdjustmentLog::new();
        let id = Ulid::new();
        let first = Adjustment::new(
            AdjustmentKind::RoomChange,
            snapshot(id, 8, BookingStatus::Scheduled),
            snapshot(id, 8, BookingStatus::Scheduled),
            None,
            "admin",
        );
        let second = Adjustment::new(
            AdjustmentKind::Cancellation,
            snapshot(id, 8, BookingStatus::Scheduled),
            snapshot(id, 8, BookingStatus::Cancelled),
            Some("greve".into()),
            "admin",
        );
        log.append(first.clone());
        log.append(second.clone());

        assert_eq!(log.history(&id), vec![second, first]);
        assert!(log.history(&Ulid::new()).is_empty());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn by_author_filters() {
        let log = AdjustmentLog::new();
        for author in ["alice", "bob", "alice"] {
            let id = Ulid::new();
            log.append(Adjustment::new(
                AdjustmentKind::Reschedule,
                snapshot(id, 8, BookingStatus::Scheduled),
                snapshot(id, 10, BookingStatus::Scheduled),
                None,
                author,
            ));
        }
        assert_eq!(log.by_author("alice").len(), 2);
        assert_eq!(log.by_author("bob").len(), 1);
        assert!(log.by_author("carol").is_empty());
        assert_eq!(log.all().len(), 3);
    }
}
