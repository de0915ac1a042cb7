//! Read-model query endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{PatientId, PrescriptionId};
use projections::{PatientChart, PharmacyPrescription};
use store::Store;

use crate::AppState;
use crate::error::ApiError;

/// GET /pharmacy/prescriptions: the pharmacy worklist, newest first.
pub async fn pharmacy_list<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<PharmacyPrescription>>, ApiError> {
    Ok(Json(state.queries.pharmacy_prescriptions().await?))
}

/// GET /pharmacy/prescriptions/{id}
#[tracing::instrument(skip(state))]
pub async fn pharmacy_get<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<PrescriptionId>,
) -> Result<Json<PharmacyPrescription>, ApiError> {
    Ok(Json(state.queries.pharmacy_prescription(id).await?))
}

/// GET /patients/{id}/chart
#[tracing::instrument(skip(state))]
pub async fn patient_chart<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(patient_id): Path<PatientId>,
) -> Result<Json<PatientChart>, ApiError> {
    Ok(Json(state.queries.patient_chart(patient_id).await?))
}
