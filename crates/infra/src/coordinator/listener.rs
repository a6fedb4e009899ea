//! Notification listener.
//!
//! Turns start/resume notifications from other instances into local loops.
//! A notification only triggers a re-evaluation: if a job is running, a loop
//! joins it; otherwise nothing happens.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Coordinator, CoordinatorError};
use crate::bus::{BusError, NotificationBus, Subscription};
use crate::store::CoordinationStore;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

pub struct NotificationListener;

impl NotificationListener {
    /// Subscribe to `bus` and spawn the listening task.
    ///
    /// Fails if the first subscription fails; later subscription failures
    /// are retried in the background.
    pub async fn spawn<S, B>(
        coordinator: Coordinator<S>,
        bus: B,
    ) -> Result<ListenerHandle, CoordinatorError>
    where
        S: CoordinationStore,
        B: NotificationBus,
    {
        let subscription = bus.subscribe().await?;
        let shutdown = CancellationToken::new();

        let join = tokio::spawn(listen(coordinator, bus, subscription, shutdown.clone()));

        Ok(ListenerHandle {
            shutdown,
            join: Some(join),
        })
    }
}

/// Handle to a running listener. Dropping it stops the listener.
pub struct ListenerHandle {
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(error = %e, "notification listener task failed");
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn listen<S, B>(
    coordinator: Coordinator<S>,
    bus: B,
    mut subscription: Box<dyn Subscription>,
    shutdown: CancellationToken,
) where
    S: CoordinationStore,
    B: NotificationBus,
{
    info!(coordinator = %coordinator.config().name, "listening for job notifications");

    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = subscription.recv() => received,
        };

        match received {
            Ok(_) => on_notification(&coordinator).await,
            Err(BusError::Closed) => {
                info!("notification channel closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "notification subscription lost, resubscribing");
                match resubscribe(&bus, &shutdown).await {
                    Some(fresh) => subscription = fresh,
                    None => break,
                }
            }
        }
    }

    info!(coordinator = %coordinator.config().name, "notification listener stopped");
}

async fn on_notification<S: CoordinationStore>(coordinator: &Coordinator<S>) {
    match coordinator.join_active().await {
        Ok(Some(job)) => info!(job_id = %job, "notification received, joining running job"),
        Ok(None) => debug!("notification received, no running job to join"),
        Err(e) => warn!(error = %e, "notification received but the ledger could not be read"),
    }
}

async fn resubscribe<B: NotificationBus>(
    bus: &B,
    shutdown: &CancellationToken,
) -> Option<Box<dyn Subscription>> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
        }

        match bus.subscribe().await {
            Ok(subscription) => return Some(subscription),
            Err(e) => warn!(error = %e, "resubscribe failed"),
        }
    }
}
