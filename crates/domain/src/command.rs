//! Write-side commands.

use chrono::{DateTime, Utc};
use common::{MedicationId, PatientId, PrescriberId};
use events::PrescribedMedication;
use serde::Deserialize;

use crate::DomainError;

/// Command to create a new prescription.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatePrescription {
    pub prescriber_id: PrescriberId,
    pub patient_id: PatientId,

    /// Defaults to the time the command is handled.
    #[serde(default)]
    pub prescribed_at: Option<DateTime<Utc>>,

    pub medications: Vec<PrescribedMedication>,
}

impl CreatePrescription {
    /// Creates a command with no medications.
    pub fn new(prescriber_id: PrescriberId, patient_id: PatientId) -> Self {
        Self {
            prescriber_id,
            patient_id,
            prescribed_at: None,
            medications: Vec::new(),
        }
    }

    /// Adds a medication line.
    pub fn with_medication(
        mut self,
        medication_id: MedicationId,
        schedule: impl Into<String>,
        dosage: impl Into<String>,
    ) -> Self {
        self.medications
            .push(PrescribedMedication::new(medication_id, schedule, dosage));
        self
    }

    pub fn prescribed_at(mut self, at: DateTime<Utc>) -> Self {
        self.prescribed_at = Some(at);
        self
    }

    /// Checks the shape of the command. Referential checks happen in the service.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.medications.is_empty() {
            return Err(DomainError::Validation(
                "a prescription needs at least one medication".to_string(),
            ));
        }

        for item in &self.medications {
            if item.schedule.trim().is_empty() {
                return Err(DomainError::Validation(format!(
                    "medication {} has an empty schedule",
                    item.medication_id
                )));
            }
            if item.dosage.trim().is_empty() {
                return Err(DomainError::Validation(format!(
                    "medication {} has an empty dosage",
                    item.medication_id
                )));
            }
        }

        Ok(())
    }
}
