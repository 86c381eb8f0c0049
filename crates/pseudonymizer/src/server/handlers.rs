//! Axum request handlers for all service endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{ErrorResponse, HealthResponse, PseudonymizeRequest};
use common::ServiceError;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use super::state::AppState;
use crate::pseudonymize::Operation;

/// `POST /{operation}`: run one of the four pseudonymization operations.
///
/// Unknown operations are answered with `405` before the body is inspected.
pub async fn pseudonymize(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    body: Result<Json<PseudonymizeRequest>, JsonRejection>,
) -> Response {
    let operation = Operation::from_path(&segment);
    let span = info_span!(
        "pseudonymize",
        request_id = %Uuid::new_v4(),
        operation = operation.as_str()
    );

    async move {
        if operation == Operation::Unsupported {
            return error_response(ServiceError::UnsupportedOperation);
        }

        let Json(req) = match body {
            Ok(json) => json,
            Err(rejection) => {
                warn!(error = %rejection, "rejected request body");
                let err = ErrorResponse::new(format!(
                    "invalid request body: {}",
                    rejection.body_text()
                ));
                return (StatusCode::BAD_REQUEST, Json(err)).into_response();
            }
        };

        match state.service.handle(operation, req).await {
            Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
            Err(e) => error_response(e),
        }
    }
    .instrument(span)
    .await
}

/// `GET /health`: readiness check.
///
/// Returns `200 OK` once the DEK is loaded, `503 Service Unavailable` otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let dek_ready = state.service.is_ready();

    let (status_code, status_str) = if dek_ready {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status_str.into(),
        dek_ready,
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all for unknown paths and methods.
pub async fn unsupported() -> Response {
    error_response(ServiceError::UnsupportedOperation)
}

fn error_response(err: ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::new(err.to_string()))).into_response()
}
