//! Postgres LISTEN/NOTIFY notification bus.
//!
//! Notes:
//! - `NOTIFY` is transactional: a notification sent inside a transaction is
//!   delivered only if that transaction commits.
//! - `PgListener` holds a dedicated connection and reconnects on its own after
//!   a connection loss; notifications sent while disconnected are lost.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::debug;

use super::{BusError, Notification, NotificationBus, Subscription};

/// Subscribes to a notification channel on the shared Postgres store.
#[derive(Debug, Clone)]
pub struct PgNotificationBus {
    pool: PgPool,
    channel: String,
}

impl PgNotificationBus {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

struct PgSubscription {
    listener: PgListener,
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn recv(&mut self) -> Result<Notification, BusError> {
        let msg = self
            .listener
            .recv()
            .await
            .map_err(|e| BusError::Listen(e.to_string()))?;
        debug!(channel = msg.channel(), "notification received");
        Ok(Notification)
    }
}

#[async_trait]
impl NotificationBus for PgNotificationBus {
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, BusError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| BusError::Listen(e.to_string()))?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|e| BusError::Listen(e.to_string()))?;

        Ok(Box::new(PgSubscription { listener }))
    }
}
