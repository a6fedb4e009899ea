use axum::{Router, routing::get};

pub mod jobs;
pub mod system;

/// Router for the job control endpoints.
///
/// `GET` is accepted next to `POST` on the transitions so plain links and
/// scripts keep working.
pub fn router() -> Router {
    Router::new()
        .route("/start", get(jobs::start).post(jobs::start))
        .route("/pause", get(jobs::pause).post(jobs::pause))
        .route("/resume", get(jobs::resume).post(jobs::resume))
        .route("/stat", get(jobs::stat))
}
