use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for calendar change events.
///
/// Subscribers either follow one property (live availability views) or the whole
/// engine (owner/admin notification relays). Slow receivers see `Lagged` and should
/// refetch the calendar.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to events for one property. Creates the channel if needed.
    pub fn subscribe(&self, property_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(property_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to events for every property.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if let Some(sender) = self.channels.get(&event.property_id()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }

    /// Drop a property channel once its last subscriber is gone.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn blocked(property_id: Ulid) -> Event {
        Event::DateBlocked {
            property_id,
            date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let pid = Ulid::new();
        let mut rx = hub.subscribe(pid);

        let event = blocked(pid);
        hub.send(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn property_subscribers_are_isolated() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);
        let mut rx_all = hub.subscribe_all();

        hub.send(&blocked(b));

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_all.recv().await.unwrap().property_id(), b);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&blocked(Ulid::new()));
    }

    #[test]
    fn prune_drops_dead_channels() {
        let hub = NotifyHub::new();
        let pid = Ulid::new();
        let rx = hub.subscribe(pid);
        drop(rx);
        hub.prune();
        assert!(hub.channels.is_empty());
    }
}
