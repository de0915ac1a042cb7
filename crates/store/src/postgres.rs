use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MedicationId, OutboxId, PatientId, PrescriberId, PrescriptionId};
use events::PrescribedMedication;
use sqlx::{PgExecutor, PgPool, Row, postgres::PgRow};

use crate::{
    ChartViewRow, Medication, NewOutboxRecord, NewPrescription, OutboxPolicy, OutboxRecord,
    OutboxStore, Patient, PharmacyViewRow, Prescriber, Prescription, PrescriptionStore, ReadStore,
    ReferenceData, Result, StoreError,
};

const OUTBOX_COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, created_at, \
     processed_at, published_at, error_message, retry_count";

const PHARMACY_COLUMNS: &str = "prescription_id, prescribed_at, patient_id, patient_name, \
     patient_birth_date, medication_id, medication_name, medication_description, schedule, dosage";

const CHART_COLUMNS: &str = "prescription_id, prescribed_at, patient_id, patient_name, \
     patient_birth_date, patient_address, prescriber_id, prescriber_name, prescriber_specialty, \
     prescriber_license_number, medication_id, medication_name, medication_description, \
     schedule, dosage";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the tables this crate reads and writes.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn insert_outbox<'e>(
        executor: impl PgExecutor<'e>,
        record: NewOutboxRecord,
    ) -> Result<OutboxRecord> {
        let sql = format!(
            "INSERT INTO outbox_events (aggregate_type, aggregate_id, event_type, payload) \
             VALUES ($1, $2, $3, $4) RETURNING {OUTBOX_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&record.aggregate_type)
            .bind(&record.aggregate_id)
            .bind(&record.event_type)
            .bind(&record.payload)
            .fetch_one(executor)
            .await?;
        Self::row_to_outbox(row)
    }

    fn row_to_prescriber(row: PgRow) -> Result<Prescriber> {
        Ok(Prescriber {
            id: PrescriberId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            specialty: row.try_get("specialty")?,
            license_number: row.try_get("license_number")?,
        })
    }

    fn row_to_patient(row: PgRow) -> Result<Patient> {
        Ok(Patient {
            id: PatientId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            birth_date: row.try_get("birth_date")?,
            address: row.try_get("address")?,
        })
    }

    fn row_to_medication(row: PgRow) -> Result<Medication> {
        Ok(Medication {
            id: MedicationId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<PrescribedMedication> {
        Ok(PrescribedMedication {
            medication_id: MedicationId::new(row.try_get("medication_id")?),
            schedule: row.try_get("schedule")?,
            dosage: row.try_get("dosage")?,
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxRecord> {
        let retry_count: i32 = row.try_get("retry_count")?;
        Ok(OutboxRecord {
            id: OutboxId::new(row.try_get("id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            published_at: row.try_get("published_at")?,
            error_message: row.try_get("error_message")?,
            retry_count: u32::try_from(retry_count)
                .map_err(|_| StoreError::InvalidData(format!("retry_count {retry_count}")))?,
        })
    }

    fn row_to_pharmacy(row: PgRow) -> Result<PharmacyViewRow> {
        Ok(PharmacyViewRow {
            prescription_id: PrescriptionId::new(row.try_get("prescription_id")?),
            prescribed_at: row.try_get("prescribed_at")?,
            patient_id: PatientId::new(row.try_get("patient_id")?),
            patient_name: row.try_get("patient_name")?,
            patient_birth_date: row.try_get("patient_birth_date")?,
            medication_id: MedicationId::new(row.try_get("medication_id")?),
            medication_name: row.try_get("medication_name")?,
            medication_description: row.try_get("medication_description")?,
            schedule: row.try_get("schedule")?,
            dosage: row.try_get("dosage")?,
        })
    }

    fn row_to_chart(row: PgRow) -> Result<ChartViewRow> {
        Ok(ChartViewRow {
            prescription_id: PrescriptionId::new(row.try_get("prescription_id")?),
            prescribed_at: row.try_get("prescribed_at")?,
            patient_id: PatientId::new(row.try_get("patient_id")?),
            patient_name: row.try_get("patient_name")?,
            patient_birth_date: row.try_get("patient_birth_date")?,
            patient_address: row.try_get("patient_address")?,
            prescriber_id: PrescriberId::new(row.try_get("prescriber_id")?),
            prescriber_name: row.try_get("prescriber_name")?,
            prescriber_specialty: row.try_get("prescriber_specialty")?,
            prescriber_license_number: row.try_get("prescriber_license_number")?,
            medication_id: MedicationId::new(row.try_get("medication_id")?),
            medication_name: row.try_get("medication_name")?,
            medication_description: row.try_get("medication_description")?,
            schedule: row.try_get("schedule")?,
            dosage: row.try_get("dosage")?,
        })
    }
}

#[async_trait]
impl ReferenceData for PostgresStore {
    async fn prescriber(&self, id: PrescriberId) -> Result<Option<Prescriber>> {
        sqlx::query("SELECT id, name, specialty, license_number FROM prescribers WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_prescriber)
            .transpose()
    }

    async fn patient(&self, id: PatientId) -> Result<Option<Patient>> {
        sqlx::query("SELECT id, name, birth_date, address FROM patients WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_patient)
            .transpose()
    }

    async fn medication(&self, id: MedicationId) -> Result<Option<Medication>> {
        sqlx::query("SELECT id, name, description FROM medications WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_medication)
            .transpose()
    }

    async fn list_prescribers(&self) -> Result<Vec<Prescriber>> {
        let rows = sqlx::query(
            "SELECT id, name, specialty, license_number FROM prescribers ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_prescriber).collect()
    }

    async fn list_patients(&self) -> Result<Vec<Patient>> {
        let rows = sqlx::query("SELECT id, name, birth_date, address FROM patients ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_patient).collect()
    }

    async fn list_medications(&self) -> Result<Vec<Medication>> {
        let rows = sqlx::query("SELECT id, name, description FROM medications ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_medication).collect()
    }
}

#[async_trait]
impl PrescriptionStore for PostgresStore {
    #[tracing::instrument(skip(self, prescription), fields(patient_id = %prescription.patient_id))]
    async fn create_prescription(
        &self,
        prescription: NewPrescription,
        outbox: OutboxPolicy,
    ) -> Result<Prescription> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO prescriptions (prescriber_id, patient_id, prescribed_at)
            VALUES ($1, $2, $3)
            RETURNING id, prescribed_at, created_at
            "#,
        )
        .bind(prescription.prescriber_id.as_i64())
        .bind(prescription.patient_id.as_i64())
        .bind(prescription.prescribed_at)
        .fetch_one(&mut *tx)
        .await?;

        let id = PrescriptionId::new(row.try_get("id")?);

        for item in &prescription.medications {
            sqlx::query(
                r#"
                INSERT INTO prescription_medications (prescription_id, medication_id, schedule, dosage)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(id.as_i64())
            .bind(item.medication_id.as_i64())
            .bind(&item.schedule)
            .bind(&item.dosage)
            .execute(&mut *tx)
            .await?;
        }

        let stored = Prescription {
            id,
            prescriber_id: prescription.prescriber_id,
            patient_id: prescription.patient_id,
            prescribed_at: row.try_get("prescribed_at")?,
            created_at: row.try_get("created_at")?,
            medications: prescription.medications,
        };

        if outbox == OutboxPolicy::Stage {
            let record = NewOutboxRecord::prescription_created(&stored)?;
            Self::insert_outbox(&mut *tx, record).await?;
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn prescription(&self, id: PrescriptionId) -> Result<Option<Prescription>> {
        let Some(row) = sqlx::query(
            "SELECT id, prescriber_id, patient_id, prescribed_at, created_at FROM prescriptions WHERE id = $1",
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let medications = self.prescription_items(id).await?;

        Ok(Some(Prescription {
            id,
            prescriber_id: PrescriberId::new(row.try_get("prescriber_id")?),
            patient_id: PatientId::new(row.try_get("patient_id")?),
            prescribed_at: row.try_get("prescribed_at")?,
            created_at: row.try_get("created_at")?,
            medications,
        }))
    }

    async fn prescription_items(&self, id: PrescriptionId) -> Result<Vec<PrescribedMedication>> {
        let rows = sqlx::query(
            r#"
            SELECT medication_id, schedule, dosage
            FROM prescription_medications
            WHERE prescription_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn enqueue(&self, record: NewOutboxRecord) -> Result<OutboxRecord> {
        Self::insert_outbox(&self.pool, record).await
    }

    async fn fetch_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
    ) -> Result<Vec<OutboxRecord>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events \
             WHERE processed_at IS NULL AND retry_count < $1 \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(i32::try_from(max_retries).unwrap_or(i32::MAX))
            .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_processed(
        &self,
        id: OutboxId,
        processed_at: DateTime<Utc>,
        published_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET processed_at = $2, published_at = $3, error_message = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(processed_at)
        .bind(published_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: OutboxId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1, error_message = $2
            WHERE id = $1
            "#,
        )
        .bind(id.as_i64())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE processed_at IS NOT NULL AND processed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn pending_count(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE processed_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl ReadStore for PostgresStore {
    async fn insert_pharmacy_row(&self, row: &PharmacyViewRow) -> Result<()> {
        let sql = format!(
            "INSERT INTO pharmacy_view ({PHARMACY_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&sql)
            .bind(row.prescription_id.as_i64())
            .bind(row.prescribed_at)
            .bind(row.patient_id.as_i64())
            .bind(&row.patient_name)
            .bind(row.patient_birth_date)
            .bind(row.medication_id.as_i64())
            .bind(&row.medication_name)
            .bind(&row.medication_description)
            .bind(&row.schedule)
            .bind(&row.dosage)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_chart_row(&self, row: &ChartViewRow) -> Result<()> {
        let sql = format!(
            "INSERT INTO patient_chart_view ({CHART_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        );
        sqlx::query(&sql)
            .bind(row.prescription_id.as_i64())
            .bind(row.prescribed_at)
            .bind(row.patient_id.as_i64())
            .bind(&row.patient_name)
            .bind(row.patient_birth_date)
            .bind(&row.patient_address)
            .bind(row.prescriber_id.as_i64())
            .bind(&row.prescriber_name)
            .bind(&row.prescriber_specialty)
            .bind(&row.prescriber_license_number)
            .bind(row.medication_id.as_i64())
            .bind(&row.medication_name)
            .bind(&row.medication_description)
            .bind(&row.schedule)
            .bind(&row.dosage)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pharmacy_rows_for_prescription(
        &self,
        id: PrescriptionId,
    ) -> Result<Vec<PharmacyViewRow>> {
        let sql = format!(
            "SELECT {PHARMACY_COLUMNS} FROM pharmacy_view WHERE prescription_id = $1 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_pharmacy).collect()
    }

    async fn pharmacy_rows(&self) -> Result<Vec<PharmacyViewRow>> {
        let sql = format!(
            "SELECT {PHARMACY_COLUMNS} FROM pharmacy_view \
             ORDER BY prescribed_at DESC, prescription_id DESC, id ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_pharmacy).collect()
    }

    async fn chart_rows_for_patient(&self, id: PatientId) -> Result<Vec<ChartViewRow>> {
        let sql = format!(
            "SELECT {CHART_COLUMNS} FROM patient_chart_view WHERE patient_id = $1 \
             ORDER BY prescribed_at DESC, prescription_id DESC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_chart).collect()
    }
}
