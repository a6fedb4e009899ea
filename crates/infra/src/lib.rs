//! Infrastructure layer: the shared store, the notification bus and the
//! job-coordination engine built on top of them.
//!
//! The store is the only coordination medium. There is no leader and no
//! in-process lock shared between control handlers and processing loops;
//! every mutual-exclusion guarantee comes from store transactions.

pub mod bus;
pub mod coordinator;
pub mod store;
pub mod workload;

pub use bus::{
    BusError, InMemoryNotificationBus, Notification, NotificationBus, PgNotificationBus,
    Subscription, NOTIFY_CHANNEL,
};
pub use coordinator::{
    BatchClaimer, Coordinator, CoordinatorConfig, CoordinatorError, JobStateEvaluator,
    ListenerHandle, LoopOutcome, LoopProgress, LoopReport, LoopSupervisor, NotificationListener,
    DEFAULT_BATCH_SIZE,
};
pub use store::{
    ClaimError, ClaimOutcome, CoordinationStore, InMemoryCoordinationStore,
    PostgresCoordinationStore, StartOutcome, StoreError,
};
pub use workload::{ItemWorkload, SumWorkload};
