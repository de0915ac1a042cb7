//! Domain error types.

use common::{MedicationId, PatientId, PrescriberId};
use events::DecodeError;
use store::StoreError;
use thiserror::Error;

/// Errors returned by the write path.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Prescriber not found: {0}")]
    PrescriberNotFound(PrescriberId),

    #[error("Patient not found: {0}")]
    PatientNotFound(PatientId),

    #[error("Medication not found: {0}")]
    MedicationNotFound(MedicationId),

    /// The request is malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error occurred in the store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DomainError {
    /// Whether the error names a missing reference.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::PrescriberNotFound(_)
                | DomainError::PatientNotFound(_)
                | DomainError::MedicationNotFound(_)
        )
    }
}

/// Errors returned by commit hooks.
#[derive(Debug, Error)]
pub enum HookError {
    /// The event could not be encoded.
    #[error("Event encoding error: {0}")]
    Encode(#[from] DecodeError),

    /// The encoded event could not be delivered.
    #[error("Publish failed: {0}")]
    Publish(String),
}
