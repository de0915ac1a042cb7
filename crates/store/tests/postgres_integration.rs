//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and need a Docker daemon.
//! They run serially because each one truncates the shared tables.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use common::{MedicationId, OutboxId, PatientId, PrescriberId, PrescriptionId};
use events::{EventEnvelope, PrescribedMedication};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    ChartViewRow, NewOutboxRecord, NewPrescription, OutboxPolicy, OutboxStore, PharmacyViewRow,
    PostgresStore, PrescriptionStore, ReadStore, ReferenceData,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// A fresh store with its own pool, emptied tables and seeded reference data.
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE pharmacy_view, patient_chart_view, outbox_events, \
         prescription_medications, prescriptions, medications, patients, prescribers \
         RESTART IDENTITY",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::raw_sql(
        r#"
        INSERT INTO prescribers (id, name, specialty, license_number)
            VALUES (1, 'Dr. Helena Costa', 'Cardiology', 'CRM-1234');
        INSERT INTO patients (id, name, birth_date, address)
            VALUES (2, 'Ana Souza', '1980-03-15', 'Rua das Flores 10');
        INSERT INTO medications (id, name, description) VALUES
            (10, 'Amoxicillin', 'Antibiotic'),
            (11, 'Ibuprofen', 'Anti-inflammatory');
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

/// Reads `(retry_count, error_message)` of one outbox row.
async fn outbox_row(store: &PostgresStore, id: OutboxId) -> Option<(i32, Option<String>)> {
    sqlx::query_as("SELECT retry_count, error_message FROM outbox_events WHERE id = $1")
        .bind(id.as_i64())
        .fetch_optional(store.pool())
        .await
        .unwrap()
}

async fn prescription_count(store: &PostgresStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM prescriptions")
        .fetch_one(store.pool())
        .await
        .unwrap()
}

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

fn raw_record() -> NewOutboxRecord {
    NewOutboxRecord {
        aggregate_type: "prescription".to_string(),
        aggregate_id: "1".to_string(),
        event_type: "prescription.created".to_string(),
        payload: b"{}".to_vec(),
    }
}

#[tokio::test]
#[serial]
async fn reference_lookups() {
    let store = get_test_store().await;

    let prescriber = store.prescriber(PrescriberId::new(1)).await.unwrap().unwrap();
    assert_eq!(prescriber.license_number, "CRM-1234");

    let patient = store.patient(PatientId::new(2)).await.unwrap().unwrap();
    assert_eq!(
        patient.birth_date,
        NaiveDate::from_ymd_opt(1980, 3, 15).unwrap()
    );

    assert!(store.medication(MedicationId::new(99)).await.unwrap().is_none());
    assert_eq!(store.list_medications().await.unwrap().len(), 2);
}

#[tokio::test]
#[serial]
async fn staged_prescription_commits_with_outbox_record() {
    let store = get_test_store().await;

    let prescription = store
        .create_prescription(new_prescription(), OutboxPolicy::Stage)
        .await
        .unwrap();

    let loaded = store.prescription(prescription.id).await.unwrap().unwrap();
    assert_eq!(loaded.medications.len(), 2);
    assert_eq!(loaded.medications[0].schedule, "08:00");

    let pending = store.fetch_pending(100, 5).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].aggregate_id, prescription.id.to_string());
    assert_eq!(
        pending[0].message_key(),
        format!("prescription-{}", prescription.id)
    );

    let envelope = EventEnvelope::from_slice(&pending[0].payload).unwrap();
    assert_eq!(
        envelope.decode().unwrap().prescription_id(),
        prescription.id
    );
}

#[tokio::test]
#[serial]
async fn failed_write_leaves_no_outbox_record() {
    let store = get_test_store().await;
    let mut prescription = new_prescription();
    prescription.medications[1].medication_id = MedicationId::new(404);

    let result = store
        .create_prescription(prescription, OutboxPolicy::Stage)
        .await;

    assert!(result.is_err());
    assert_eq!(store.pending_count().await.unwrap(), 0);
    assert!(
        store
            .prescription(PrescriptionId::new(1))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn failed_outbox_insert_rolls_back_prescription() {
    let store = get_test_store().await;
    sqlx::query("ALTER TABLE outbox_events ADD CONSTRAINT reject_all CHECK (false) NOT VALID")
        .execute(store.pool())
        .await
        .unwrap();

    let result = store
        .create_prescription(new_prescription(), OutboxPolicy::Stage)
        .await;

    sqlx::query("ALTER TABLE outbox_events DROP CONSTRAINT reject_all")
        .execute(store.pool())
        .await
        .unwrap();

    assert!(result.is_err());
    assert_eq!(prescription_count(&store).await, 0);
    assert_eq!(store.pending_count().await.unwrap(), 0);

    store
        .create_prescription(new_prescription(), OutboxPolicy::Stage)
        .await
        .unwrap();
    assert_eq!(prescription_count(&store).await, 1);
    assert_eq!(store.pending_count().await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn retry_cap_excludes_rows() {
    let store = get_test_store().await;
    let record = store.enqueue(raw_record()).await.unwrap();

    for _ in 0..5 {
        store.mark_failed(record.id, "broker down").await.unwrap();
    }

    assert!(store.fetch_pending(100, 5).await.unwrap().is_empty());
    let (retry_count, error_message) = outbox_row(&store, record.id).await.unwrap();
    assert_eq!(retry_count, 5);
    assert_eq!(error_message.as_deref(), Some("broker down"));
    assert_eq!(store.pending_count().await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn housekeeping_respects_retention_window() {
    let store = get_test_store().await;
    let old = store.enqueue(raw_record()).await.unwrap();
    let recent = store.enqueue(raw_record()).await.unwrap();
    let now = Utc::now();

    store
        .mark_processed(old.id, now - Duration::days(8), now - Duration::days(8))
        .await
        .unwrap();
    store
        .mark_processed(recent.id, now - Duration::hours(1), now - Duration::hours(1))
        .await
        .unwrap();

    let deleted = store
        .delete_processed_before(now - Duration::days(7))
        .await
        .unwrap();

    assert_eq!(deleted, 1);
    assert!(outbox_row(&store, old.id).await.is_none());
    assert!(outbox_row(&store, recent.id).await.is_some());
}

#[tokio::test]
#[serial]
async fn read_views_append_rows() {
    let store = get_test_store().await;
    let prescribed_at = Utc::now();
    let birth_date = NaiveDate::from_ymd_opt(1980, 3, 15).unwrap();

    let pharmacy = PharmacyViewRow {
        prescription_id: PrescriptionId::new(100),
        prescribed_at,
        patient_id: PatientId::new(2),
        patient_name: "Ana Souza".to_string(),
        patient_birth_date: birth_date,
        medication_id: MedicationId::new(10),
        medication_name: "Amoxicillin".to_string(),
        medication_description: "Antibiotic".to_string(),
        schedule: "08:00".to_string(),
        dosage: "500mg".to_string(),
    };
    let chart = ChartViewRow {
        prescription_id: PrescriptionId::new(100),
        prescribed_at,
        patient_id: PatientId::new(2),
        patient_name: "Ana Souza".to_string(),
        patient_birth_date: birth_date,
        patient_address: "Rua das Flores 10".to_string(),
        prescriber_id: PrescriberId::new(1),
        prescriber_name: "Dr. Helena Costa".to_string(),
        prescriber_specialty: "Cardiology".to_string(),
        prescriber_license_number: "CRM-1234".to_string(),
        medication_id: MedicationId::new(10),
        medication_name: "Amoxicillin".to_string(),
        medication_description: "Antibiotic".to_string(),
        schedule: "08:00".to_string(),
        dosage: "500mg".to_string(),
    };

    store.insert_pharmacy_row(&pharmacy).await.unwrap();
    store.insert_pharmacy_row(&pharmacy).await.unwrap();
    store.insert_chart_row(&chart).await.unwrap();

    let rows = store
        .pharmacy_rows_for_prescription(PrescriptionId::new(100))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].medication_name, "Amoxicillin");

    let chart_rows = store.chart_rows_for_patient(PatientId::new(2)).await.unwrap();
    assert_eq!(chart_rows.len(), 1);
    assert_eq!(chart_rows[0].prescriber_name, "Dr. Helena Costa");
}
