//! Projection error types.

use common::{MedicationId, PatientId, PrescriberId};
use store::StoreError;
use thiserror::Error;

/// Errors raised while projecting a notification or querying a view.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Prescriber not found: {0}")]
    PrescriberNotFound(PrescriberId),

    #[error("Patient not found: {0}")]
    PatientNotFound(PatientId),

    #[error("Medication not found: {0}")]
    MedicationNotFound(MedicationId),

    /// A view holds no rows for the requested key.
    #[error("No {view} rows for {id}")]
    NotFound { view: &'static str, id: i64 },
}

impl ProjectionError {
    /// Errors that may succeed when the notification is delivered again.
    pub fn is_transient(&self) -> bool {
        match self {
            ProjectionError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
