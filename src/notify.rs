use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Booking, ResourceKey, ResourceSet};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    BookingCreated,
    BookingCancelled,
    ConflictRejected,
}

/// Domain event handed to the notification service after a ledger decision.
/// Delivery may repeat; consumers deduplicate on `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: Ulid,
    pub kind: NoticeKind,
    pub booking_id: Ulid,
    pub resources: ResourceSet,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(kind: NoticeKind, booking: &Booking) -> Self {
        Self {
            id: Ulid::new(),
            kind,
            booking_id: booking.id,
            resources: booking.resources,
            at: Utc::now(),
        }
    }
}

/// Boundary to whatever delivers notifications (push, mail, in-app).
/// Called synchronously by the engine; implementations must not block.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, notice: &Notice);
}

/// Broadcast hub with one channel per resource. A notice goes out on the
/// channels of its room, teacher and group.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<ResourceKey, broadcast::Sender<Notice>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a resource's notices, creating the channel if needed.
    pub fn subscribe(&self, key: ResourceKey) -> broadcast::Receiver<Notice> {
        self.channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop a channel, e.g. when the resource is retired.
    pub fn remove(&self, key: &ResourceKey) {
        self.channels.remove(key);
    }
}

impl Dispatcher for NotifyHub {
    /// No-op for resources nobody listens to.
    fn dispatch(&self, notice: &Notice) {
        for key in notice.resources.keys() {
            if let Some(sender) = self.channels.get(&key) {
                let _ = sender.send(notice.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewBooking, TemporalSlot};
    use chrono::{NaiveDate, NaiveTime};

    fn booking(room: i64, teacher: i64, group: i64) -> Booking {
        NewBooking {
            id: Ulid::new(),
            subject_id: 1,
            resources: ResourceSet::new(room, teacher, group),
            slot: TemporalSlot::new(
                NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
                NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            )
            .unwrap(),
        }
        .into_booking(None)
    }

    #[tokio::test]
    async fn teacher_channel_receives_notice() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(ResourceKey::teacher(7));

        let notice = Notice::new(NoticeKind::BookingCreated, &booking(101, 7, 3));
        hub.dispatch(&notice);

        assert_eq!(rx.recv().await.unwrap(), notice);
    }

    #[tokio::test]
    async fn unrelated_channel_stays_quiet() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(ResourceKey::room(102));
        hub.dispatch(&Notice::new(NoticeKind::BookingCancelled, &booking(101, 7, 3)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn removed_channel_closes_receivers() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(ResourceKey::room(5));
        hub.remove(&ResourceKey::room(5));
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn dispatch_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.dispatch(&Notice::new(NoticeKind::ConflictRejected, &booking(1, 2, 3)));
    }
}
