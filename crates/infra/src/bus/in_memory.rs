//! In-memory notification bus for tests/dev.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{BusError, Notification, NotificationBus, Subscription};

const CAPACITY: usize = 64;

/// In-memory pub/sub bus.
///
/// - Best-effort fan-out to every live subscriber
/// - A lagging subscriber sees a single notification instead of the backlog,
///   which is equivalent since notifications carry nothing
#[derive(Debug, Clone)]
pub struct InMemoryNotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl InMemoryNotificationBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    /// Deliver a notification to every current subscriber.
    pub fn notify(&self) {
        // No subscribers is fine.
        let _ = self.tx.send(Notification);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryNotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemorySubscription {
    rx: broadcast::Receiver<Notification>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn recv(&mut self) -> Result<Notification, BusError> {
        match self.rx.recv().await {
            Ok(n) => Ok(n),
            Err(broadcast::error::RecvError::Lagged(_)) => Ok(Notification),
            Err(broadcast::error::RecvError::Closed) => Err(BusError::Closed),
        }
    }
}

#[async_trait]
impl NotificationBus for InMemoryNotificationBus {
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, BusError> {
        Ok(Box::new(InMemorySubscription {
            rx: self.tx.subscribe(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_to_all_subscribers() {
        let bus = InMemoryNotificationBus::new();
        let mut a = bus.subscribe().await.unwrap();
        let mut b = bus.subscribe().await.unwrap();
        assert_eq!(bus.subscriber_count(), 2);

        bus.notify();

        assert_eq!(a.recv().await.unwrap(), Notification);
        assert_eq!(b.recv().await.unwrap(), Notification);
    }

    #[tokio::test]
    async fn lagging_subscriber_still_wakes() {
        let bus = InMemoryNotificationBus::new();
        let mut sub = bus.subscribe().await.unwrap();

        for _ in 0..(CAPACITY * 2) {
            bus.notify();
        }

        assert!(sub.recv().await.is_ok());
    }
}
