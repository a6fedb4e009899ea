//! HTTP application wiring (Axum router).
//!
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use batchline_infra::{CoordinationStore, Coordinator};

pub mod dto;
pub mod errors;
pub mod routes;

/// The coordinator as seen by handlers: store type erased, cheap to clone.
pub type SharedCoordinator = Coordinator<Arc<dyn CoordinationStore>>;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(coordinator: SharedCoordinator) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(coordinator)))
}
