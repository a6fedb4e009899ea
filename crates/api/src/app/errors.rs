use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use batchline_infra::CoordinatorError;

pub fn coordinator_error_to_response(err: CoordinatorError) -> axum::response::Response {
    match err {
        CoordinatorError::UndefinedState => undefined_state(),
        CoordinatorError::Timeout { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "timeout", err.to_string())
        }
        CoordinatorError::Store(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        CoordinatorError::Bus(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "bus_error", e.to_string())
        }
        CoordinatorError::Workload(e) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "workload_error", e.to_string())
        }
    }
}

/// The job ledger could not be read, so no decision can be made.
pub fn undefined_state() -> axum::response::Response {
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "undefined_state",
        "job state could not be determined",
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
