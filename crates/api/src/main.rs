use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use batchline_api::{app::build_app, config::AppConfig};
use batchline_infra::{
    CoordinationStore, Coordinator, NOTIFY_CHANNEL, NotificationListener, PgNotificationBus,
    PostgresCoordinationStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    batchline_observability::init();

    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the coordination store")?;

    let store = PostgresCoordinationStore::new(pool.clone());
    store
        .ensure_schema()
        .await
        .context("failed to prepare the schema")?;

    let store: Arc<dyn CoordinationStore> = Arc::new(store);
    let coordinator = Coordinator::new(store, config.coordinator_config());

    let listener = NotificationListener::spawn(
        coordinator.clone(),
        PgNotificationBus::new(pool, NOTIFY_CHANNEL),
    )
    .await
    .context("failed to subscribe to job notifications")?;

    let state = coordinator
        .rejoin_on_boot()
        .await
        .context("job state is undefined at boot")?;
    info!(%state, "job state at boot");

    let tcp = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("listening on {}", tcp.local_addr()?);

    axum::serve(tcp, build_app(coordinator.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    listener.shutdown().await;
    let reports = coordinator.shutdown().await;
    info!(loops = reports.len(), "coordinator stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
