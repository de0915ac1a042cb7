//! Read-side queries over the two views.
//!
//! Queries never touch the write-side tables: everything returned here comes
//! from rows the projector appended.

use chrono::{DateTime, NaiveDate, Utc};
use common::{MedicationId, PatientId, PrescriberId, PrescriptionId};
use serde::Serialize;
use store::{ChartViewRow, PharmacyViewRow, ReadStore};

use crate::{ProjectionError, Result};

/// A medication line as shown in either view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewMedication {
    pub medication_id: MedicationId,
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub dosage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PharmacyPatient {
    pub id: PatientId,
    pub name: String,
    pub birth_date: NaiveDate,
}

/// One prescription on the pharmacy worklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PharmacyPrescription {
    pub prescription_id: PrescriptionId,
    pub prescribed_at: DateTime<Utc>,
    pub patient: PharmacyPatient,
    pub medications: Vec<ViewMedication>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartPatient {
    pub id: PatientId,
    pub name: String,
    pub birth_date: NaiveDate,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartPrescriber {
    pub id: PrescriberId,
    pub name: String,
    pub specialty: String,
    pub license_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartPrescription {
    pub prescription_id: PrescriptionId,
    pub prescribed_at: DateTime<Utc>,
    pub prescriber: ChartPrescriber,
    pub medications: Vec<ViewMedication>,
}

/// A patient's chart, newest prescription first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientChart {
    pub patient: ChartPatient,
    pub prescriptions: Vec<ChartPrescription>,
}

impl From<&PharmacyViewRow> for ViewMedication {
    fn from(row: &PharmacyViewRow) -> Self {
        Self {
            medication_id: row.medication_id,
            name: row.medication_name.clone(),
            description: row.medication_description.clone(),
            schedule: row.schedule.clone(),
            dosage: row.dosage.clone(),
        }
    }
}

impl From<&ChartViewRow> for ViewMedication {
    fn from(row: &ChartViewRow) -> Self {
        Self {
            medication_id: row.medication_id,
            name: row.medication_name.clone(),
            description: row.medication_description.clone(),
            schedule: row.schedule.clone(),
            dosage: row.dosage.clone(),
        }
    }
}

impl From<&PharmacyViewRow> for PharmacyPrescription {
    fn from(row: &PharmacyViewRow) -> Self {
        Self {
            prescription_id: row.prescription_id,
            prescribed_at: row.prescribed_at,
            patient: PharmacyPatient {
                id: row.patient_id,
                name: row.patient_name.clone(),
                birth_date: row.patient_birth_date,
            },
            medications: Vec::new(),
        }
    }
}

impl From<&ChartViewRow> for ChartPrescription {
    fn from(row: &ChartViewRow) -> Self {
        Self {
            prescription_id: row.prescription_id,
            prescribed_at: row.prescribed_at,
            prescriber: ChartPrescriber {
                id: row.prescriber_id,
                name: row.prescriber_name.clone(),
                specialty: row.prescriber_specialty.clone(),
                license_number: row.prescriber_license_number.clone(),
            },
            medications: Vec::new(),
        }
    }
}

/// Groups consecutive pharmacy rows by prescription.
fn group_pharmacy(rows: &[PharmacyViewRow]) -> Vec<PharmacyPrescription> {
    let mut grouped: Vec<PharmacyPrescription> = Vec::new();
    for row in rows {
        match grouped.last_mut() {
            Some(current) if current.prescription_id == row.prescription_id => {
                current.medications.push(row.into());
            }
            _ => {
                let mut prescription = PharmacyPrescription::from(row);
                prescription.medications.push(row.into());
                grouped.push(prescription);
            }
        }
    }
    grouped
}

/// Query surface over the read store.
#[derive(Clone)]
pub struct QueryService<R> {
    store: R,
}

impl<R: ReadStore> QueryService<R> {
    pub fn new(store: R) -> Self {
        Self { store }
    }

    /// One prescription as seen by the pharmacy.
    #[tracing::instrument(skip(self))]
    pub async fn pharmacy_prescription(&self, id: PrescriptionId) -> Result<PharmacyPrescription> {
        let rows = self.store.pharmacy_rows_for_prescription(id).await?;
        group_pharmacy(&rows)
            .into_iter()
            .next()
            .ok_or(ProjectionError::NotFound {
                view: "pharmacy",
                id: id.as_i64(),
            })
    }

    /// The whole worklist, newest prescription first.
    pub async fn pharmacy_prescriptions(&self) -> Result<Vec<PharmacyPrescription>> {
        let rows = self.store.pharmacy_rows().await?;
        Ok(group_pharmacy(&rows))
    }

    #[tracing::instrument(skip(self))]
    pub async fn patient_chart(&self, patient_id: PatientId) -> Result<PatientChart> {
        let rows = self.store.chart_rows_for_patient(patient_id).await?;
        let Some(first) = rows.first() else {
            return Err(ProjectionError::NotFound {
                view: "chart",
                id: patient_id.as_i64(),
            });
        };

        let patient = ChartPatient {
            id: first.patient_id,
            name: first.patient_name.clone(),
            birth_date: first.patient_birth_date,
            address: first.patient_address.clone(),
        };

        let mut prescriptions: Vec<ChartPrescription> = Vec::new();
        for row in &rows {
            match prescriptions.last_mut() {
                Some(current) if current.prescription_id == row.prescription_id => {
                    current.medications.push(row.into());
                }
                _ => {
                    let mut prescription = ChartPrescription::from(row);
                    prescription.medications.push(row.into());
                    prescriptions.push(prescription);
                }
            }
        }

        Ok(PatientChart {
            patient,
            prescriptions,
        })
    }
}
