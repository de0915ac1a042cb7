//! Prescription service: the write-side entry point.

use std::collections::BTreeSet;

use chrono::Utc;
use store::{
    Medication, NewPrescription, OutboxPolicy, Patient, Prescriber, Prescription,
    PrescriptionStore, ReferenceData,
};

use crate::{CreatePrescription, DomainError, WritePath};

/// Validates and persists prescriptions through the configured write path.
pub struct PrescriptionService<S> {
    store: S,
    write_path: WritePath,
}

impl<S> PrescriptionService<S>
where
    S: ReferenceData + PrescriptionStore,
{
    pub fn new(store: S, write_path: WritePath) -> Self {
        Self { store, write_path }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn write_path(&self) -> &WritePath {
        &self.write_path
    }

    /// Creates a prescription.
    ///
    /// Every referenced prescriber, patient and medication must exist. On the
    /// direct path the commit hook runs after the commit and its failure is
    /// only logged.
    #[tracing::instrument(
        skip(self, cmd),
        fields(
            prescriber_id = %cmd.prescriber_id,
            patient_id = %cmd.patient_id,
            write_path = self.write_path.name(),
        )
    )]
    pub async fn create_prescription(
        &self,
        cmd: CreatePrescription,
    ) -> Result<Prescription, DomainError> {
        cmd.validate()?;
        self.check_references(&cmd).await?;

        let outbox = match self.write_path {
            WritePath::Outbox => OutboxPolicy::Stage,
            WritePath::DirectPublish(_) | WritePath::ChangeCapture => OutboxPolicy::Skip,
        };

        let prescription = self
            .store
            .create_prescription(
                NewPrescription {
                    prescriber_id: cmd.prescriber_id,
                    patient_id: cmd.patient_id,
                    prescribed_at: cmd.prescribed_at.unwrap_or_else(Utc::now),
                    medications: cmd.medications,
                },
                outbox,
            )
            .await?;

        metrics::counter!("prescriptions_created_total", "write_path" => self.write_path.name())
            .increment(1);
        tracing::info!(
            prescription_id = %prescription.id,
            medications = prescription.medications.len(),
            "Prescription committed"
        );

        if let WritePath::DirectPublish(hook) = &self.write_path
            && let Err(e) = hook.after_commit(&prescription).await
        {
            metrics::counter!("direct_publish_failures_total").increment(1);
            tracing::warn!(
                prescription_id = %prescription.id,
                error = %e,
                "Post-commit publish failed; read models will miss this prescription"
            );
        }

        Ok(prescription)
    }

    pub async fn list_prescribers(&self) -> Result<Vec<Prescriber>, DomainError> {
        Ok(self.store.list_prescribers().await?)
    }

    pub async fn list_patients(&self) -> Result<Vec<Patient>, DomainError> {
        Ok(self.store.list_patients().await?)
    }

    pub async fn list_medications(&self) -> Result<Vec<Medication>, DomainError> {
        Ok(self.store.list_medications().await?)
    }

    async fn check_references(&self, cmd: &CreatePrescription) -> Result<(), DomainError> {
        if self.store.prescriber(cmd.prescriber_id).await?.is_none() {
            return Err(DomainError::PrescriberNotFound(cmd.prescriber_id));
        }
        if self.store.patient(cmd.patient_id).await?.is_none() {
            return Err(DomainError::PatientNotFound(cmd.patient_id));
        }

        let medication_ids: BTreeSet<_> = cmd.medications.iter().map(|m| m.medication_id).collect();
        for id in medication_ids {
            if self.store.medication(id).await?.is_none() {
                return Err(DomainError::MedicationNotFound(id));
            }
        }

        Ok(())
    }
}
