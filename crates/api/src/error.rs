//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use projections::ProjectionError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Command rejected or failed on the write side.
    Domain(DomainError),
    /// Read-model query failed.
    Query(ProjectionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Query(err) => query_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    match &err {
        DomainError::PrescriberNotFound(_)
        | DomainError::PatientNotFound(_)
        | DomainError::MedicationNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        DomainError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        DomainError::Store(store_err) => store_error_to_response(store_err),
    }
}

fn query_error_to_response(err: ProjectionError) -> (StatusCode, String) {
    match &err {
        ProjectionError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        ProjectionError::Store(store_err) => store_error_to_response(store_err),
        _ => {
            tracing::error!(error = %err, "query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn store_error_to_response(err: &StoreError) -> (StatusCode, String) {
    tracing::error!(error = %err, "store error");
    if err.is_transient() {
        (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Query(err)
    }
}
