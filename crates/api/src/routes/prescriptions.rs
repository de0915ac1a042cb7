//! Prescription command and reference data endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use domain::CreatePrescription;
use store::{Medication, Patient, Prescriber, Prescription, Store};

use crate::AppState;
use crate::error::ApiError;

/// POST /prescriptions: validate and commit a prescription.
#[tracing::instrument(skip(state, body))]
pub async fn create<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<CreatePrescription>, JsonRejection>,
) -> Result<(StatusCode, Json<Prescription>), ApiError> {
    let Json(cmd) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let prescription = state.prescriptions.create_prescription(cmd).await?;
    Ok((StatusCode::CREATED, Json(prescription)))
}

/// GET /prescribers
pub async fn list_prescribers<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Prescriber>>, ApiError> {
    Ok(Json(state.prescriptions.list_prescribers().await?))
}

/// GET /patients
pub async fn list_patients<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Patient>>, ApiError> {
    Ok(Json(state.prescriptions.list_patients().await?))
}

/// GET /medications
pub async fn list_medications<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Medication>>, ApiError> {
    Ok(Json(state.prescriptions.list_medications().await?))
}
