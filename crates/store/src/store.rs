use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MedicationId, OutboxId, PatientId, PrescriberId, PrescriptionId};
use events::PrescribedMedication;

use crate::{
    ChartViewRow, Medication, NewOutboxRecord, NewPrescription, OutboxPolicy, OutboxRecord,
    Patient, PharmacyViewRow, Prescriber, Prescription, Result,
};

/// Lookups against the reference tables.
///
/// A missing row is `Ok(None)`; `Err` is reserved for infrastructure failures.
#[async_trait]
pub trait ReferenceData: Send + Sync {
    async fn prescriber(&self, id: PrescriberId) -> Result<Option<Prescriber>>;

    async fn patient(&self, id: PatientId) -> Result<Option<Patient>>;

    async fn medication(&self, id: MedicationId) -> Result<Option<Medication>>;

    async fn list_prescribers(&self) -> Result<Vec<Prescriber>>;

    async fn list_patients(&self) -> Result<Vec<Patient>>;

    async fn list_medications(&self) -> Result<Vec<Medication>>;
}

/// The normalized write side.
#[async_trait]
pub trait PrescriptionStore: Send + Sync {
    /// Persists a prescription and its line items in one transaction.
    ///
    /// With [`OutboxPolicy::Stage`] the same transaction also inserts the
    /// `prescription.created` outbox record; either both exist or neither does.
    async fn create_prescription(
        &self,
        prescription: NewPrescription,
        outbox: OutboxPolicy,
    ) -> Result<Prescription>;

    /// Loads a prescription with all its line items.
    async fn prescription(&self, id: PrescriptionId) -> Result<Option<Prescription>>;

    /// Loads only the line items of a prescription, in insertion order.
    async fn prescription_items(&self, id: PrescriptionId) -> Result<Vec<PrescribedMedication>>;
}

/// Relay-facing operations on the outbox table.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Inserts a standalone outbox record.
    async fn enqueue(&self, record: NewOutboxRecord) -> Result<OutboxRecord>;

    /// Returns up to `batch_size` unprocessed rows with `retry_count < max_retries`,
    /// oldest first.
    async fn fetch_pending(&self, batch_size: usize, max_retries: u32)
    -> Result<Vec<OutboxRecord>>;

    /// Marks a row processed and clears its last error.
    async fn mark_processed(
        &self,
        id: OutboxId,
        processed_at: DateTime<Utc>,
        published_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Records a failed publish attempt.
    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()>;

    /// Deletes processed rows whose `processed_at` is before `cutoff`.
    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Counts rows with `processed_at IS NULL`, dead-lettered rows included.
    async fn pending_count(&self) -> Result<u64>;
}

/// The two denormalized read models. Writes are plain appends.
#[async_trait]
pub trait ReadStore: Send + Sync {
    async fn insert_pharmacy_row(&self, row: &PharmacyViewRow) -> Result<()>;

    async fn insert_chart_row(&self, row: &ChartViewRow) -> Result<()>;

    async fn pharmacy_rows_for_prescription(
        &self,
        id: PrescriptionId,
    ) -> Result<Vec<PharmacyViewRow>>;

    /// All pharmacy rows, newest prescription first.
    async fn pharmacy_rows(&self) -> Result<Vec<PharmacyViewRow>>;

    /// Chart rows of one patient, newest prescription first.
    async fn chart_rows_for_patient(&self, id: PatientId) -> Result<Vec<ChartViewRow>>;
}

/// Everything a single database offers.
pub trait Store: ReferenceData + PrescriptionStore + OutboxStore + ReadStore {}

impl<T: ReferenceData + PrescriptionStore + OutboxStore + ReadStore> Store for T {}
