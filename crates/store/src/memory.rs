use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MedicationId, OutboxId, PatientId, PrescriberId, PrescriptionId};
use events::PrescribedMedication;
use tokio::sync::RwLock;

use crate::{
    ChartViewRow, Medication, NewOutboxRecord, NewPrescription, OutboxPolicy, OutboxRecord,
    OutboxStore, Patient, PharmacyViewRow, Prescriber, Prescription, PrescriptionStore, ReadStore,
    ReferenceData, Result, StoreError,
};

/// Operations that can be made to fail on an [`InMemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Prescription writes that stage an outbox record.
    OutboxWrites,
    /// `mark_processed` on outbox rows.
    MarkProcessed,
    PharmacyWrites,
    ChartWrites,
    PrescriberLookups,
    /// `prescription` and `prescription_items` reads.
    PrescriptionReads,
    /// The same reads, failing as rows that no longer decode.
    CorruptPrescriptions,
}

struct Tables {
    prescribers: BTreeMap<PrescriberId, Prescriber>,
    patients: BTreeMap<PatientId, Patient>,
    medications: BTreeMap<MedicationId, Medication>,
    prescriptions: BTreeMap<PrescriptionId, Prescription>,
    outbox: Vec<OutboxRecord>,
    pharmacy_view: Vec<PharmacyViewRow>,
    chart_view: Vec<ChartViewRow>,
    next_prescription_id: i64,
    next_outbox_id: i64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            prescribers: BTreeMap::new(),
            patients: BTreeMap::new(),
            medications: BTreeMap::new(),
            prescriptions: BTreeMap::new(),
            outbox: Vec::new(),
            pharmacy_view: Vec::new(),
            chart_view: Vec::new(),
            next_prescription_id: 1,
            next_outbox_id: 1,
        }
    }
}

impl Tables {
    fn insert_outbox(&mut self, record: NewOutboxRecord, created_at: DateTime<Utc>) -> OutboxRecord {
        let stored = OutboxRecord {
            id: OutboxId::new(self.next_outbox_id),
            aggregate_type: record.aggregate_type,
            aggregate_id: record.aggregate_id,
            event_type: record.event_type,
            payload: record.payload,
            created_at,
            processed_at: None,
            published_at: None,
            error_message: None,
            retry_count: 0,
        };
        self.next_outbox_id += 1;
        self.outbox.push(stored.clone());
        stored
    }

    fn outbox_mut(&mut self, id: OutboxId) -> Result<&mut OutboxRecord> {
        self.outbox
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::InvalidData(format!("outbox record {id} does not exist")))
    }
}

/// In-memory store for tests.
///
/// Behaves like [`crate::PostgresStore`], including transactional prescription
/// writes, and can be told to fail selected operations via [`Fault`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<RwLock<HashSet<Fault>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identity given to the next created prescription.
    pub async fn with_next_prescription_id(self, id: i64) -> Self {
        self.tables.write().await.next_prescription_id = id;
        self
    }

    pub async fn add_prescriber(&self, prescriber: Prescriber) {
        self.tables
            .write()
            .await
            .prescribers
            .insert(prescriber.id, prescriber);
    }

    pub async fn add_patient(&self, patient: Patient) {
        self.tables
            .write()
            .await
            .patients
            .insert(patient.id, patient);
    }

    pub async fn add_medication(&self, medication: Medication) {
        self.tables
            .write()
            .await
            .medications
            .insert(medication.id, medication);
    }

    /// Makes every subsequent call of the given kind fail.
    pub async fn inject(&self, fault: Fault) {
        self.faults.write().await.insert(fault);
    }

    pub async fn clear(&self, fault: Fault) {
        self.faults.write().await.remove(&fault);
    }

    /// Overrides the creation time of an outbox record.
    pub async fn set_outbox_created_at(&self, id: OutboxId, created_at: DateTime<Utc>) {
        let mut tables = self.tables.write().await;
        if let Ok(record) = tables.outbox_mut(id) {
            record.created_at = created_at;
        }
    }

    /// Returns a copy of every outbox record in insertion order.
    pub async fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.tables.read().await.outbox.clone()
    }

    pub async fn pharmacy_row_count(&self) -> usize {
        self.tables.read().await.pharmacy_view.len()
    }

    pub async fn chart_row_count(&self) -> usize {
        self.tables.read().await.chart_view.len()
    }

    async fn check(&self, fault: Fault) -> Result<()> {
        let faults = self.faults.read().await;
        if faults.contains(&fault) {
            return Err(StoreError::Unavailable(format!("injected fault: {fault:?}")));
        }
        if fault == Fault::PrescriptionReads && faults.contains(&Fault::CorruptPrescriptions) {
            return Err(StoreError::InvalidData("injected corrupt prescription row".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReferenceData for InMemoryStore {
    async fn prescriber(&self, id: PrescriberId) -> Result<Option<Prescriber>> {
        self.check(Fault::PrescriberLookups).await?;
        Ok(self.tables.read().await.prescribers.get(&id).cloned())
    }

    async fn patient(&self, id: PatientId) -> Result<Option<Patient>> {
        Ok(self.tables.read().await.patients.get(&id).cloned())
    }

    async fn medication(&self, id: MedicationId) -> Result<Option<Medication>> {
        Ok(self.tables.read().await.medications.get(&id).cloned())
    }

    async fn list_prescribers(&self) -> Result<Vec<Prescriber>> {
        Ok(self.tables.read().await.prescribers.values().cloned().collect())
    }

    async fn list_patients(&self) -> Result<Vec<Patient>> {
        Ok(self.tables.read().await.patients.values().cloned().collect())
    }

    async fn list_medications(&self) -> Result<Vec<Medication>> {
        Ok(self.tables.read().await.medications.values().cloned().collect())
    }
}

#[async_trait]
impl PrescriptionStore for InMemoryStore {
    async fn create_prescription(
        &self,
        prescription: NewPrescription,
        outbox: OutboxPolicy,
    ) -> Result<Prescription> {
        if outbox == OutboxPolicy::Stage {
            self.check(Fault::OutboxWrites).await?;
        }

        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let stored = Prescription {
            id: PrescriptionId::new(tables.next_prescription_id),
            prescriber_id: prescription.prescriber_id,
            patient_id: prescription.patient_id,
            prescribed_at: prescription.prescribed_at,
            created_at: now,
            medications: prescription.medications,
        };

        // Build the outbox record before touching any table so that an
        // encoding failure leaves nothing behind.
        let record = match outbox {
            OutboxPolicy::Stage => Some(NewOutboxRecord::prescription_created(&stored)?),
            OutboxPolicy::Skip => None,
        };

        tables.next_prescription_id += 1;
        tables.prescriptions.insert(stored.id, stored.clone());
        if let Some(record) = record {
            tables.insert_outbox(record, now);
        }

        Ok(stored)
    }

    async fn prescription(&self, id: PrescriptionId) -> Result<Option<Prescription>> {
        self.check(Fault::PrescriptionReads).await?;
        Ok(self.tables.read().await.prescriptions.get(&id).cloned())
    }

    async fn prescription_items(&self, id: PrescriptionId) -> Result<Vec<PrescribedMedication>> {
        self.check(Fault::PrescriptionReads).await?;
        Ok(self
            .tables
            .read()
            .await
            .prescriptions
            .get(&id)
            .map(|p| p.medications.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn enqueue(&self, record: NewOutboxRecord) -> Result<OutboxRecord> {
        self.check(Fault::OutboxWrites).await?;
        Ok(self.tables.write().await.insert_outbox(record, Utc::now()))
    }

    async fn fetch_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
    ) -> Result<Vec<OutboxRecord>> {
        let tables = self.tables.read().await;
        let mut pending: Vec<_> = tables
            .outbox
            .iter()
            .filter(|r| r.processed_at.is_none() && r.retry_count < max_retries)
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.created_at, r.id));
        pending.truncate(batch_size);
        Ok(pending)
    }

    async fn mark_processed(
        &self,
        id: OutboxId,
        processed_at: DateTime<Utc>,
        published_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check(Fault::MarkProcessed).await?;
        let mut tables = self.tables.write().await;
        let record = tables.outbox_mut(id)?;
        record.processed_at = Some(processed_at);
        record.published_at = Some(published_at);
        record.error_message = None;
        Ok(())
    }

    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let record = tables.outbox_mut(id)?;
        record.retry_count += 1;
        record.error_message = Some(error.to_string());
        Ok(())
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.outbox.len();
        tables
            .outbox
            .retain(|r| !r.processed_at.is_some_and(|at| at < cutoff));
        Ok((before - tables.outbox.len()) as u64)
    }

    async fn pending_count(&self) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables.outbox.iter().filter(|r| !r.is_processed()).count() as u64)
    }
}

#[async_trait]
impl ReadStore for InMemoryStore {
    async fn insert_pharmacy_row(&self, row: &PharmacyViewRow) -> Result<()> {
        self.check(Fault::PharmacyWrites).await?;
        self.tables.write().await.pharmacy_view.push(row.clone());
        Ok(())
    }

    async fn insert_chart_row(&self, row: &ChartViewRow) -> Result<()> {
        self.check(Fault::ChartWrites).await?;
        self.tables.write().await.chart_view.push(row.clone());
        Ok(())
    }

    async fn pharmacy_rows_for_prescription(
        &self,
        id: PrescriptionId,
    ) -> Result<Vec<PharmacyViewRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .pharmacy_view
            .iter()
            .filter(|r| r.prescription_id == id)
            .cloned()
            .collect())
    }

    async fn pharmacy_rows(&self) -> Result<Vec<PharmacyViewRow>> {
        let mut rows = self.tables.read().await.pharmacy_view.clone();
        rows.sort_by_key(|r| Reverse((r.prescribed_at, r.prescription_id)));
        Ok(rows)
    }

    async fn chart_rows_for_patient(&self, id: PatientId) -> Result<Vec<ChartViewRow>> {
        let mut rows: Vec<_> = self
            .tables
            .read()
            .await
            .chart_view
            .iter()
            .filter(|r| r.patient_id == id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| Reverse((r.prescribed_at, r.prescription_id)));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use events::EventEnvelope;

    fn new_prescription() -> NewPrescription {
        NewPrescription {
            prescriber_id: PrescriberId::new(1),
            patient_id: PatientId::new(2),
            prescribed_at: Utc::now(),
            medications: vec![
                PrescribedMedication::new(MedicationId::new(10), "08:00", "500mg"),
                PrescribedMedication::new(MedicationId::new(11), "20:00", "250mg"),
            ],
        }
    }

    fn raw_record(event_type: &str) -> NewOutboxRecord {
        NewOutboxRecord {
            aggregate_type: "prescription".to_string(),
            aggregate_id: "1".to_string(),
            event_type: event_type.to_string(),
            payload: b"{}".to_vec(),
        }
    }

    async fn stored(store: &InMemoryStore, id: OutboxId) -> Option<OutboxRecord> {
        store.outbox_records().await.into_iter().find(|r| r.id == id)
    }

    #[tokio::test]
    async fn staged_write_creates_matching_outbox_record() {
        let store = InMemoryStore::new().with_next_prescription_id(100).await;

        let prescription = store
            .create_prescription(new_prescription(), OutboxPolicy::Stage)
            .await
            .unwrap();

        assert_eq!(prescription.id, PrescriptionId::new(100));
        let outbox = store.outbox_records().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].aggregate_id, "100");
        assert_eq!(outbox[0].message_key(), "prescription-100");
        assert_eq!(outbox[0].event_type, "prescription.created");

        let envelope = EventEnvelope::from_slice(&outbox[0].payload).unwrap();
        assert_eq!(
            envelope.decode().unwrap().prescription_id(),
            PrescriptionId::new(100)
        );
    }

    #[tokio::test]
    async fn skipped_policy_writes_no_outbox_record() {
        let store = InMemoryStore::new();
        store
            .create_prescription(new_prescription(), OutboxPolicy::Skip)
            .await
            .unwrap();
        assert!(store.outbox_records().await.is_empty());
    }

    #[tokio::test]
    async fn failed_outbox_write_leaves_no_prescription() {
        let store = InMemoryStore::new();
        store.inject(Fault::OutboxWrites).await;

        let result = store
            .create_prescription(new_prescription(), OutboxPolicy::Stage)
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(store.prescription(PrescriptionId::new(1)).await.unwrap().is_none());
        assert!(store.outbox_records().await.is_empty());
    }

    #[tokio::test]
    async fn fetch_pending_respects_order_cap_and_batch() {
        let store = InMemoryStore::new();
        let first = store.enqueue(raw_record("a")).await.unwrap();
        let second = store.enqueue(raw_record("b")).await.unwrap();
        let third = store.enqueue(raw_record("c")).await.unwrap();

        // Make the third record the oldest.
        store
            .set_outbox_created_at(third.id, first.created_at - Duration::seconds(10))
            .await;
        for _ in 0..3 {
            store.mark_failed(second.id, "broker down").await.unwrap();
        }

        let pending = store.fetch_pending(10, 3).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![third.id, first.id]);

        let batch = store.fetch_pending(1, 3).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, third.id);
    }

    #[tokio::test]
    async fn mark_processed_clears_error() {
        let store = InMemoryStore::new();
        let record = store.enqueue(raw_record("a")).await.unwrap();
        store.mark_failed(record.id, "timeout").await.unwrap();

        let now = Utc::now();
        store.mark_processed(record.id, now, now).await.unwrap();

        let stored = stored(&store, record.id).await.unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.error_message, None);
        assert_eq!(stored.processed_at, Some(now));
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_processed_before_cutoff_only() {
        let store = InMemoryStore::new();
        let old = store.enqueue(raw_record("a")).await.unwrap();
        let recent = store.enqueue(raw_record("b")).await.unwrap();
        let pending = store.enqueue(raw_record("c")).await.unwrap();

        let now = Utc::now();
        store
            .mark_processed(old.id, now - Duration::days(8), now - Duration::days(8))
            .await
            .unwrap();
        store
            .mark_processed(recent.id, now - Duration::days(1), now - Duration::days(1))
            .await
            .unwrap();

        let deleted = store
            .delete_processed_before(now - Duration::days(7))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(stored(&store, old.id).await.is_none());
        assert!(stored(&store, recent.id).await.is_some());
        assert!(stored(&store, pending.id).await.is_some());
    }

    #[tokio::test]
    async fn read_rows_are_appended() {
        let store = InMemoryStore::new();
        let row = PharmacyViewRow {
            prescription_id: PrescriptionId::new(1),
            prescribed_at: Utc::now(),
            patient_id: PatientId::new(2),
            patient_name: "Ana".to_string(),
            patient_birth_date: NaiveDate::from_ymd_opt(1980, 1, 1).unwrap(),
            medication_id: MedicationId::new(10),
            medication_name: "Amoxicillin".to_string(),
            medication_description: "Antibiotic".to_string(),
            schedule: "08:00".to_string(),
            dosage: "500mg".to_string(),
        };

        store.insert_pharmacy_row(&row).await.unwrap();
        store.insert_pharmacy_row(&row).await.unwrap();

        assert_eq!(
            store
                .pharmacy_rows_for_prescription(PrescriptionId::new(1))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn injected_faults_can_be_cleared() {
        let store = InMemoryStore::new();
        store.inject(Fault::PrescriberLookups).await;
        assert!(store.prescriber(PrescriberId::new(1)).await.is_err());

        store.clear(Fault::PrescriberLookups).await;
        assert!(store.prescriber(PrescriberId::new(1)).await.unwrap().is_none());
    }
}
