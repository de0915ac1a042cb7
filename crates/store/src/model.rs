use chrono::{DateTime, NaiveDate, Utc};
use common::{MedicationId, OutboxId, PatientId, PrescriberId, PrescriptionId};
use events::{EventEnvelope, PrescribedMedication, PrescriptionCreatedData, PrescriptionEvent};
use serde::{Deserialize, Serialize};

use crate::Result;

/// A physician allowed to prescribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescriber {
    pub id: PrescriberId,
    pub name: String,
    pub specialty: String,
    pub license_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub name: String,
    pub birth_date: NaiveDate,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    pub id: MedicationId,
    pub name: String,
    pub description: String,
}

/// A committed prescription with its line items in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: PrescriptionId,
    pub prescriber_id: PrescriberId,
    pub patient_id: PatientId,
    pub prescribed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub medications: Vec<PrescribedMedication>,
}

impl From<&Prescription> for PrescriptionCreatedData {
    fn from(prescription: &Prescription) -> Self {
        Self {
            prescription_id: prescription.id,
            prescriber_id: prescription.prescriber_id,
            patient_id: prescription.patient_id,
            prescribed_at: prescription.prescribed_at,
            medications: prescription.medications.clone(),
        }
    }
}

/// A validated prescription about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrescription {
    pub prescriber_id: PrescriberId,
    pub patient_id: PatientId,
    pub prescribed_at: DateTime<Utc>,
    pub medications: Vec<PrescribedMedication>,
}

/// Whether a prescription write also stages an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutboxPolicy {
    #[default]
    Skip,
    /// Insert a `prescription.created` outbox record in the same transaction.
    Stage,
}

/// A row of the `outbox_events` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub id: OutboxId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl OutboxRecord {
    /// Broker partition key, `{aggregate_type}-{aggregate_id}`.
    pub fn message_key(&self) -> String {
        format!("{}-{}", self.aggregate_type, self.aggregate_id)
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// An outbox row to insert outside of a prescription write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxRecord {
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Vec<u8>,
}

impl NewOutboxRecord {
    /// Builds the `prescription.created` record staged with a new prescription.
    pub fn prescription_created(prescription: &Prescription) -> Result<Self> {
        let event = PrescriptionEvent::Created(PrescriptionCreatedData::from(prescription));
        let payload = EventEnvelope::new(&event)?.to_vec()?;

        Ok(Self {
            aggregate_type: PrescriptionId::AGGREGATE_TYPE.to_string(),
            aggregate_id: prescription.id.to_string(),
            event_type: event.event_type().to_string(),
            payload,
        })
    }
}

/// One line of the pharmacy worklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PharmacyViewRow {
    pub prescription_id: PrescriptionId,
    pub prescribed_at: DateTime<Utc>,
    pub patient_id: PatientId,
    pub patient_name: String,
    pub patient_birth_date: NaiveDate,
    pub medication_id: MedicationId,
    pub medication_name: String,
    pub medication_description: String,
    pub schedule: String,
    pub dosage: String,
}

/// One line of a patient's chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartViewRow {
    pub prescription_id: PrescriptionId,
    pub prescribed_at: DateTime<Utc>,
    pub patient_id: PatientId,
    pub patient_name: String,
    pub patient_birth_date: NaiveDate,
    pub patient_address: String,
    pub prescriber_id: PrescriberId,
    pub prescriber_name: String,
    pub prescriber_specialty: String,
    pub prescriber_license_number: String,
    pub medication_id: MedicationId,
    pub medication_name: String,
    pub medication_description: String,
    pub schedule: String,
    pub dosage: String,
}
