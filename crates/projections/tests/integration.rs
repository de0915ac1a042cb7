//! Integration tests: PrescriptionService → EventProjector → QueryService.

use chrono::{NaiveDate, TimeZone, Utc};
use common::{MedicationId, PatientId, PrescriberId, PrescriptionId};
use domain::{CreatePrescription, PrescriptionService, WritePath};
use events::{ChangeNotification, PrescriptionCreatedData};
use projections::{EventProjector, Projection, ProjectionError, QueryService};
use store::{Fault, InMemoryStore, Medication, Patient, Prescriber, Prescription};

async fn setup() -> (
    PrescriptionService<InMemoryStore>,
    EventProjector<InMemoryStore>,
    QueryService<InMemoryStore>,
    InMemoryStore,
) {
    let store = InMemoryStore::new().with_next_prescription_id(100).await;
    store
        .add_prescriber(Prescriber {
            id: PrescriberId::new(1),
            name: "Dr. Helena Costa".to_string(),
            specialty: "Cardiology".to_string(),
            license_number: "CRM-1234".to_string(),
        })
        .await;
    store
        .add_patient(Patient {
            id: PatientId::new(2),
            name: "Ana Souza".to_string(),
            birth_date: NaiveDate::from_ymd_opt(1980, 3, 15).unwrap(),
            address: "Rua das Flores 10".to_string(),
        })
        .await;
    store
        .add_medication(Medication {
            id: MedicationId::new(10),
            name: "Amoxicillin".to_string(),
            description: "Antibiotic".to_string(),
        })
        .await;
    store
        .add_medication(Medication {
            id: MedicationId::new(11),
            name: "Ibuprofen".to_string(),
            description: "Anti-inflammatory".to_string(),
        })
        .await;

    (
        PrescriptionService::new(store.clone(), WritePath::ChangeCapture),
        EventProjector::new(store.clone()),
        QueryService::new(store.clone()),
        store,
    )
}

fn notification_for(prescription: &Prescription) -> ChangeNotification {
    ChangeNotification::from(PrescriptionCreatedData::from(prescription))
}

fn command(hour: u32) -> CreatePrescription {
    CreatePrescription::new(PrescriberId::new(1), PatientId::new(2))
        .prescribed_at(Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap())
        .with_medication(MedicationId::new(10), "08:00", "500mg")
        .with_medication(MedicationId::new(11), "20:00", "250mg")
}

#[tokio::test]
async fn projected_prescription_is_visible_in_both_views() {
    let (service, projector, queries, _) = setup().await;

    let prescription = service.create_prescription(command(8)).await.unwrap();
    assert_eq!(prescription.id, PrescriptionId::new(100));

    let report = projector
        .project(&notification_for(&prescription))
        .await
        .unwrap();
    assert_eq!(report.rows_written(), 4);

    let pharmacy = queries
        .pharmacy_prescription(PrescriptionId::new(100))
        .await
        .unwrap();
    assert_eq!(pharmacy.patient.name, "Ana Souza");
    assert_eq!(pharmacy.medications.len(), 2);
    assert_eq!(pharmacy.medications[1].name, "Ibuprofen");

    let chart = queries.patient_chart(PatientId::new(2)).await.unwrap();
    assert_eq!(chart.patient.address, "Rua das Flores 10");
    assert_eq!(chart.prescriptions.len(), 1);
    assert_eq!(chart.prescriptions[0].prescriber.name, "Dr. Helena Costa");
    assert_eq!(chart.prescriptions[0].medications[0].dosage, "500mg");
}

#[tokio::test]
async fn chart_lists_prescriptions_newest_first() {
    let (service, projector, queries, _) = setup().await;

    for hour in [8, 14] {
        let prescription = service.create_prescription(command(hour)).await.unwrap();
        projector
            .project(&notification_for(&prescription))
            .await
            .unwrap();
    }

    let chart = queries.patient_chart(PatientId::new(2)).await.unwrap();
    let ids: Vec<_> = chart
        .prescriptions
        .iter()
        .map(|p| p.prescription_id)
        .collect();
    assert_eq!(ids, [PrescriptionId::new(101), PrescriptionId::new(100)]);
}

#[tokio::test]
async fn unprojected_prescription_is_not_found() {
    let (service, _, queries, _) = setup().await;

    let prescription = service.create_prescription(command(8)).await.unwrap();

    assert!(matches!(
        queries.pharmacy_prescription(prescription.id).await,
        Err(ProjectionError::NotFound { .. })
    ));
}

#[tokio::test]
async fn chart_failure_leaves_prescription_in_pharmacy_view_only() {
    let (service, projector, queries, store) = setup().await;
    let prescription = service.create_prescription(command(8)).await.unwrap();

    store.inject(Fault::ChartWrites).await;
    let report = projector
        .project(&notification_for(&prescription))
        .await
        .unwrap();

    assert_eq!(report.pharmacy_rows, 2);
    assert_eq!(report.failures, 2);
    assert!(queries.pharmacy_prescription(prescription.id).await.is_ok());
    assert!(queries.patient_chart(PatientId::new(2)).await.is_err());
}
