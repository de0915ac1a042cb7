//! The event projector writing the pharmacy and chart views.

use std::collections::BTreeMap;

use async_trait::async_trait;
use common::MedicationId;
use events::{ChangeNotification, PrescribedMedication};
use store::{
    ChartViewRow, Medication, Patient, PharmacyViewRow, Prescriber, ReadStore, ReferenceData,
};

use crate::{Projection, ProjectionError, ProjectionReport, Result};

const PHARMACY_VIEW: &str = "pharmacy";
const CHART_VIEW: &str = "chart";

/// Resolves reference data for a notification and appends one row per
/// medication line to each view.
///
/// Patient and medications must resolve before anything is written. The
/// prescriber only feeds the chart view: if its lookup fails with a store
/// error, pharmacy rows are still written and the chart rows are counted as
/// failures. Rows are plain inserts, so a redelivered notification adds
/// duplicate rows.
#[derive(Clone)]
pub struct EventProjector<S> {
    store: S,
}

impl<S> EventProjector<S>
where
    S: ReferenceData + ReadStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn resolve_medications(
        &self,
        items: &[PrescribedMedication],
    ) -> Result<BTreeMap<MedicationId, Medication>> {
        let mut resolved = BTreeMap::new();
        for item in items {
            if resolved.contains_key(&item.medication_id) {
                continue;
            }
            let medication = self
                .store
                .medication(item.medication_id)
                .await?
                .ok_or(ProjectionError::MedicationNotFound(item.medication_id))?;
            resolved.insert(item.medication_id, medication);
        }
        Ok(resolved)
    }

    /// `Ok(None)` when the lookup itself failed; the chart view is skipped then.
    async fn resolve_prescriber(
        &self,
        notification: &ChangeNotification,
    ) -> Result<Option<Prescriber>> {
        match self.store.prescriber(notification.prescriber_id).await {
            Ok(Some(prescriber)) => Ok(Some(prescriber)),
            Ok(None) => Err(ProjectionError::PrescriberNotFound(
                notification.prescriber_id,
            )),
            Err(e) => {
                tracing::error!(
                    prescription_id = %notification.prescription_id,
                    prescriber_id = %notification.prescriber_id,
                    error = %e,
                    "Prescriber lookup failed; chart rows will not be written"
                );
                Ok(None)
            }
        }
    }

    async fn write_pharmacy_row(
        &self,
        notification: &ChangeNotification,
        patient: &Patient,
        medication: &Medication,
        item: &PrescribedMedication,
    ) -> bool {
        let row = PharmacyViewRow {
            prescription_id: notification.prescription_id,
            prescribed_at: notification.prescribed_at,
            patient_id: patient.id,
            patient_name: patient.name.clone(),
            patient_birth_date: patient.birth_date,
            medication_id: medication.id,
            medication_name: medication.name.clone(),
            medication_description: medication.description.clone(),
            schedule: item.schedule.clone(),
            dosage: item.dosage.clone(),
        };

        record_write(
            PHARMACY_VIEW,
            notification,
            item,
            self.store.insert_pharmacy_row(&row).await,
        )
    }

    async fn write_chart_row(
        &self,
        notification: &ChangeNotification,
        patient: &Patient,
        prescriber: &Prescriber,
        medication: &Medication,
        item: &PrescribedMedication,
    ) -> bool {
        let row = ChartViewRow {
            prescription_id: notification.prescription_id,
            prescribed_at: notification.prescribed_at,
            patient_id: patient.id,
            patient_name: patient.name.clone(),
            patient_birth_date: patient.birth_date,
            patient_address: patient.address.clone(),
            prescriber_id: prescriber.id,
            prescriber_name: prescriber.name.clone(),
            prescriber_specialty: prescriber.specialty.clone(),
            prescriber_license_number: prescriber.license_number.clone(),
            medication_id: medication.id,
            medication_name: medication.name.clone(),
            medication_description: medication.description.clone(),
            schedule: item.schedule.clone(),
            dosage: item.dosage.clone(),
        };

        record_write(
            CHART_VIEW,
            notification,
            item,
            self.store.insert_chart_row(&row).await,
        )
    }
}

fn record_write(
    view: &'static str,
    notification: &ChangeNotification,
    item: &PrescribedMedication,
    result: store::Result<()>,
) -> bool {
    match result {
        Ok(()) => {
            metrics::counter!("projection_rows_written_total", "view" => view).increment(1);
            true
        }
        Err(e) => {
            metrics::counter!("projection_failures_total", "view" => view).increment(1);
            tracing::error!(
                view,
                prescription_id = %notification.prescription_id,
                medication_id = %item.medication_id,
                error = %e,
                "View write failed"
            );
            false
        }
    }
}

#[async_trait]
impl<S> Projection for EventProjector<S>
where
    S: ReferenceData + ReadStore,
{
    fn name(&self) -> &'static str {
        "prescription_views"
    }

    #[tracing::instrument(
        skip(self, notification),
        fields(
            prescription_id = %notification.prescription_id,
            kind = notification.kind.as_str(),
        )
    )]
    async fn project(&self, notification: &ChangeNotification) -> Result<ProjectionReport> {
        if !notification.is_projectable() {
            tracing::debug!("Notification filtered out");
            return Ok(ProjectionReport::skipped());
        }

        let patient = self
            .store
            .patient(notification.patient_id)
            .await?
            .ok_or(ProjectionError::PatientNotFound(notification.patient_id))?;
        let medications = self.resolve_medications(&notification.medications).await?;
        let prescriber = self.resolve_prescriber(notification).await?;

        let mut report = ProjectionReport::default();
        for item in &notification.medications {
            let Some(medication) = medications.get(&item.medication_id) else {
                continue;
            };

            if self
                .write_pharmacy_row(notification, &patient, medication, item)
                .await
            {
                report.pharmacy_rows += 1;
            } else {
                report.failures += 1;
            }

            let chart_written = match &prescriber {
                Some(prescriber) => {
                    self.write_chart_row(notification, &patient, prescriber, medication, item)
                        .await
                }
                None => {
                    metrics::counter!("projection_failures_total", "view" => CHART_VIEW)
                        .increment(1);
                    false
                }
            };
            if chart_written {
                report.chart_rows += 1;
            } else {
                report.failures += 1;
            }
        }

        if report.is_complete() {
            tracing::debug!(%report, "Notification projected");
        } else {
            tracing::warn!(%report, "Notification partially projected");
        }

        Ok(report)
    }
}
