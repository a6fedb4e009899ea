//! Job control handlers.
//!
//! Every handler evaluates the job state first and answers with a bare status
//! code; bodies are only sent for `/stat` and for failures.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use batchline_core::JobState;

use crate::app::{SharedCoordinator, dto::StatResponse, errors};

pub async fn start(Extension(coordinator): Extension<SharedCoordinator>) -> Response {
    match coordinator.evaluate().await {
        JobState::Undefined => errors::undefined_state(),
        JobState::Running => {
            info!("start requested while running");
            StatusCode::TOO_MANY_REQUESTS.into_response()
        }
        JobState::Paused => match coordinator.resume().await {
            Ok(_) => StatusCode::ACCEPTED.into_response(),
            Err(e) => errors::coordinator_error_to_response(e),
        },
        JobState::NeverStarted | JobState::NotRunning => match coordinator.start().await {
            Ok(_) => StatusCode::ACCEPTED.into_response(),
            Err(e) => errors::coordinator_error_to_response(e),
        },
    }
}

pub async fn pause(Extension(coordinator): Extension<SharedCoordinator>) -> Response {
    match coordinator.evaluate().await {
        JobState::Undefined => errors::undefined_state(),
        JobState::Running => match coordinator.pause().await {
            Ok(_) => StatusCode::ACCEPTED.into_response(),
            Err(e) => errors::coordinator_error_to_response(e),
        },
        state => {
            info!(%state, "pause requested while not running");
            StatusCode::PRECONDITION_FAILED.into_response()
        }
    }
}

pub async fn resume(Extension(coordinator): Extension<SharedCoordinator>) -> Response {
    match coordinator.evaluate().await {
        JobState::Undefined => errors::undefined_state(),
        JobState::Paused => match coordinator.resume().await {
            Ok(_) => StatusCode::ACCEPTED.into_response(),
            Err(e) => errors::coordinator_error_to_response(e),
        },
        state => {
            info!(%state, "resume requested while not paused");
            StatusCode::PRECONDITION_FAILED.into_response()
        }
    }
}

pub async fn stat(Extension(coordinator): Extension<SharedCoordinator>) -> Response {
    let state = coordinator.evaluate().await;
    match state {
        JobState::Undefined => errors::undefined_state(),
        JobState::NeverStarted => StatusCode::PRECONDITION_FAILED.into_response(),
        _ => match coordinator.processed_count().await {
            Ok(count) => Json(StatResponse { count, state }).into_response(),
            Err(e) => errors::coordinator_error_to_response(e),
        },
    }
}
