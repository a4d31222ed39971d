use chrono::{DateTime, Utc};
use common::{FetchError, FetchKey};
use tokio::sync::broadcast;
use tracing::debug;

/// Cache lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated {
        key: FetchKey,
        fetched_at: DateTime<Utc>,
        records: usize,
    },
    RefreshFailed {
        key: FetchKey,
        error: FetchError,
    },
    Invalidated {
        key: FetchKey,
    },
    Evicted {
        key: FetchKey,
    },
}

impl CacheEvent {
    pub fn key(&self) -> &FetchKey {
        match self {
            CacheEvent::Updated { key, .. }
            | CacheEvent::RefreshFailed { key, .. }
            | CacheEvent::Invalidated { key }
            | CacheEvent::Evicted { key } => key,
        }
    }
}

/// In-process fan-out of cache events. Publishing never blocks; slow
/// subscribers lag and skip rather than back-pressure the cache.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: CacheEvent) {
        debug!(key = %event.key(), "Publishing cache event");
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SourceKind;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let key = FetchKey::bare(SourceKind::SurgeScanner);
        bus.publish(CacheEvent::Invalidated { key: key.clone() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key(), &key);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(CacheEvent::Evicted {
            key: FetchKey::quote("SPY"),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
