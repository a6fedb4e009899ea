//! Notification bus (pub/sub mechanics only).
//!
//! Notifications carry no payload: they mean "the job ledger changed, look
//! again". Subscribers must re-evaluate state from the store instead of
//! trusting anything about the notification itself. Delivery is best-effort;
//! a missed notification only delays joining, it never breaks correctness.
//!
//! Publishing happens inside store transactions (see
//! [`CoordinationStore`](crate::store::CoordinationStore)), so this trait only
//! covers the subscribing side.

use async_trait::async_trait;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryNotificationBus;
pub use postgres::PgNotificationBus;

/// Channel used for start and resume notifications.
pub const NOTIFY_CHANNEL: &str = "__sq_notify_chan";

/// An unpayloaded "something changed" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Notification;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("failed to listen on channel: {0}")]
    Listen(String),
    #[error("notification channel closed")]
    Closed,
}

/// A live subscription to the notification channel.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next notification.
    async fn recv(&mut self) -> Result<Notification, BusError>;
}

/// Subscribing side of the notification channel.
#[async_trait]
pub trait NotificationBus: Send + Sync + 'static {
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, BusError>;
}
