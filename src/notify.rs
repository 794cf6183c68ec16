use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

#[allow(dead_code)]
const CHANNEL_CAPACITY: usize = 256;

/// The channel every committed engine event is published on.
pub const CALENDAR_CHANNEL: &str = "calendar";

/// Broadcast hub for LISTEN/NOTIFY, keyed by channel name. One venue, one
/// calendar — but the hub doesn't care how many channels exist.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
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
        }
    }

    /// Subscribe to a channel. Creates it if needed.
    #[allow(dead_code)]
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, channel: &str, event: &Event) {
        if let Some(sender) = self.channels.get(channel) {
            let _ = sender.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(CALENDAR_CHANNEL);

        let event = Event::ClientRegistered {
            id: Ulid::new(),
            name: "Ana".into(),
        };
        hub.send(CALENDAR_CHANNEL, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — should not panic
        hub.send(
            CALENDAR_CHANNEL,
            &Event::ReservationDeleted { id: Ulid::new() },
        );
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let hub = NotifyHub::new();
        let mut calendar = hub.subscribe(CALENDAR_CHANNEL);
        let _other = hub.subscribe("other");

        hub.send("other", &Event::ReservationDeleted { id: Ulid::new() });
        assert!(calendar.try_recv().is_err());
    }
}
