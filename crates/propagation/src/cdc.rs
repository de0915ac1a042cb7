//! CDC adapter: projects row-change records captured from the write tables.

use async_trait::async_trait;
use events::{
    CdcRecord, ChangeKind, ChangeNotification, PrescribedMedication, PrescriptionItemRow,
    PrescriptionRow,
};
use projections::Projection;
use store::{PrescriptionStore, ReferenceData, StoreError};
use tokio::sync::watch;

use crate::source::{self, MessageHandler};
use crate::{BrokerMessage, ConsumerConfig, EventSource, MessageConsumer, MessageOutcome, Result};

pub const PRESCRIPTIONS_TABLE: &str = "prescriptions";
pub const PRESCRIPTION_ITEMS_TABLE: &str = "prescription_medications";

#[derive(Debug, Clone)]
pub struct CdcConfig {
    /// Capture topics, named `server.schema.table`.
    pub topics: Vec<String>,
    pub consumer: ConsumerConfig,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            topics: vec![
                format!("hospital_db.public.{PRESCRIPTIONS_TABLE}"),
                format!("hospital_db.public.{PRESCRIPTION_ITEMS_TABLE}"),
            ],
            consumer: ConsumerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceTable {
    Prescriptions,
    PrescriptionItems,
}

impl SourceTable {
    /// Routes on the last dotted segment of the topic.
    fn from_topic(topic: &str) -> Option<Self> {
        match topic.rsplit('.').next()? {
            PRESCRIPTIONS_TABLE => Some(SourceTable::Prescriptions),
            PRESCRIPTION_ITEMS_TABLE => Some(SourceTable::PrescriptionItems),
            _ => None,
        }
    }
}

/// Consumes captured row changes and hands enriched notifications to the
/// projection.
///
/// Each table is handled independently. A prescription row projects every
/// line item stored for it; a line-item row re-reads its parent prescription
/// and projects that item alone. Nothing relies on the relative order of the
/// two topics.
pub struct CdcAdapter<S, C, P> {
    store: S,
    consumer: C,
    projection: P,
    config: ConsumerConfig,
}

impl<S, C, P> CdcAdapter<S, C, P>
where
    S: ReferenceData + PrescriptionStore,
    C: MessageConsumer,
    P: Projection,
{
    pub fn new(store: S, consumer: C, projection: P, config: ConsumerConfig) -> Self {
        Self {
            store,
            consumer,
            projection,
            config,
        }
    }

    async fn prescription_changed(&self, record: &CdcRecord) -> Result<MessageOutcome> {
        let row: PrescriptionRow = match record.decode_row() {
            Ok(row) => row,
            Err(e) => return Ok(MessageOutcome::Dropped(e.to_string())),
        };

        let medications = match self.store.prescription_items(row.id).await {
            Ok(medications) => medications,
            Err(e) => return classify(e),
        };
        if medications.is_empty() {
            return Ok(MessageOutcome::Dropped(format!(
                "prescription {} has no line items",
                row.id
            )));
        }

        let notification = ChangeNotification {
            kind: ChangeKind::PrescriptionCreated,
            prescription_id: row.id,
            prescriber_id: row.prescriber_id,
            patient_id: row.patient_id,
            prescribed_at: row.prescribed_at,
            medications,
            capture: None,
        }
        .with_capture(record.metadata);

        self.project(&notification).await
    }

    async fn item_changed(&self, record: &CdcRecord) -> Result<MessageOutcome> {
        let row: PrescriptionItemRow = match record.decode_row() {
            Ok(row) => row,
            Err(e) => return Ok(MessageOutcome::Dropped(e.to_string())),
        };

        let parent = match self.store.prescription(row.prescription_id).await {
            Ok(parent) => parent,
            Err(e) => return classify(e),
        };
        let Some(parent) = parent else {
            return Ok(MessageOutcome::Dropped(format!(
                "prescription {} does not exist",
                row.prescription_id
            )));
        };

        let notification = ChangeNotification {
            kind: ChangeKind::PrescriptionCreated,
            prescription_id: parent.id,
            prescriber_id: parent.prescriber_id,
            patient_id: parent.patient_id,
            prescribed_at: parent.prescribed_at,
            medications: vec![PrescribedMedication::new(
                row.medication_id,
                row.schedule,
                row.dosage,
            )],
            capture: None,
        }
        .with_capture(record.metadata);

        self.project(&notification).await
    }

    async fn project(&self, notification: &ChangeNotification) -> Result<MessageOutcome> {
        match self.projection.project(notification).await {
            Ok(report) => Ok(MessageOutcome::Projected(report)),
            Err(e) if e.is_transient() => Err(e.into()),
            Err(e) => Ok(MessageOutcome::Dropped(e.to_string())),
        }
    }
}

/// Transient store errors are redelivered; anything else drops the message.
fn classify(e: StoreError) -> Result<MessageOutcome> {
    if e.is_transient() {
        Err(e.into())
    } else {
        Ok(MessageOutcome::Dropped(e.to_string()))
    }
}

#[async_trait]
impl<S, C, P> MessageHandler for CdcAdapter<S, C, P>
where
    S: ReferenceData + PrescriptionStore,
    C: MessageConsumer,
    P: Projection,
{
    #[tracing::instrument(skip(self, message), fields(topic = %message.topic, offset = message.offset))]
    async fn handle(&self, message: &BrokerMessage) -> Result<MessageOutcome> {
        let Some(table) = SourceTable::from_topic(&message.topic) else {
            return Ok(MessageOutcome::Dropped(format!(
                "no handler for topic {}",
                message.topic
            )));
        };

        let record = match CdcRecord::from_slice(&message.payload) {
            Ok(record) => record,
            Err(e) => return Ok(MessageOutcome::Dropped(e.to_string())),
        };

        if !record.metadata.is_projectable() {
            tracing::debug!(
                operation = %record.metadata.operation,
                deleted = record.metadata.deleted,
                "Captured change filtered out"
            );
            return Ok(MessageOutcome::Skipped);
        }

        match table {
            SourceTable::Prescriptions => self.prescription_changed(&record).await,
            SourceTable::PrescriptionItems => self.item_changed(&record).await,
        }
    }
}

#[async_trait]
impl<S, C, P> EventSource for CdcAdapter<S, C, P>
where
    S: ReferenceData + PrescriptionStore,
    C: MessageConsumer,
    P: Projection,
{
    fn name(&self) -> &'static str {
        "cdc"
    }

    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        source::consume(self.name(), &self.consumer, self, &self.config, shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{NaiveDate, TimeZone, Utc};
    use common::{MedicationId, PatientId, PrescriberId, PrescriptionId};
    use projections::EventProjector;
    use serde_json::json;
    use store::{
        Fault, InMemoryStore, Medication, NewPrescription, OutboxPolicy, Patient, Prescriber,
        ReadStore,
    };

    use super::*;
    use crate::{InMemoryBroker, InMemoryConsumer};

    const PRESCRIPTIONS_TOPIC: &str = "hospital_db.public.prescriptions";
    const ITEMS_TOPIC: &str = "hospital_db.public.prescription_medications";

    type TestAdapter = CdcAdapter<InMemoryStore, InMemoryConsumer, EventProjector<InMemoryStore>>;

    async fn seeded_store() -> InMemoryStore {
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
        for (id, name) in [(10, "Amoxicillin"), (11, "Ibuprofen")] {
            store
                .add_medication(Medication {
                    id: MedicationId::new(id),
                    name: name.to_string(),
                    description: String::new(),
                })
                .await;
        }
        store
            .create_prescription(
                NewPrescription {
                    prescriber_id: PrescriberId::new(1),
                    patient_id: PatientId::new(2),
                    prescribed_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
                    medications: vec![
                        PrescribedMedication::new(MedicationId::new(10), "08:00", "500mg"),
                        PrescribedMedication::new(MedicationId::new(11), "20:00", "250mg"),
                    ],
                },
                OutboxPolicy::Skip,
            )
            .await
            .unwrap();
        store
    }

    async fn adapter(store: &InMemoryStore, broker: &InMemoryBroker) -> TestAdapter {
        CdcAdapter::new(
            store.clone(),
            broker
                .consumer("cdc", &[PRESCRIPTIONS_TOPIC, ITEMS_TOPIC])
                .await,
            EventProjector::new(store.clone()),
            ConsumerConfig {
                poll_timeout: Duration::from_millis(10),
                retry_backoff: Duration::from_millis(10),
            },
        )
    }

    fn message(topic: &str, body: serde_json::Value) -> BrokerMessage {
        BrokerMessage {
            topic: topic.to_string(),
            key: None,
            payload: serde_json::to_vec(&body).unwrap(),
            partition: 0,
            offset: 0,
        }
    }

    fn prescription_row(op: &str) -> serde_json::Value {
        json!({
            "id": 100,
            "prescriber_id": 1,
            "patient_id": 2,
            "prescribed_at": 1_714_550_400_000_000_i64,
            "created_at": 1_714_550_400_000_000_i64,
            "__op": op,
            "__deleted": "false",
            "__source_ts_ms": 1_714_550_400_123_i64
        })
    }

    fn item_row() -> serde_json::Value {
        json!({
            "id": 7,
            "prescription_id": 100,
            "medication_id": 11,
            "schedule": "20:00",
            "dosage": "250mg",
            "created_at": "2024-05-01T08:00:00Z",
            "__op": "c",
            "__deleted": false
        })
    }

    #[test]
    fn routes_by_last_topic_segment() {
        assert_eq!(
            SourceTable::from_topic("server.public.prescriptions"),
            Some(SourceTable::Prescriptions)
        );
        assert_eq!(
            SourceTable::from_topic("prescription_medications"),
            Some(SourceTable::PrescriptionItems)
        );
        assert_eq!(SourceTable::from_topic("server.public.patients"), None);
    }

    #[tokio::test]
    async fn prescription_row_projects_every_line_item() {
        let store = seeded_store().await;
        let adapter = adapter(&store, &InMemoryBroker::new()).await;

        let outcome = adapter
            .handle(&message(PRESCRIPTIONS_TOPIC, prescription_row("c")))
            .await
            .unwrap();

        let MessageOutcome::Projected(report) = outcome else {
            panic!("expected projection, got {outcome:?}");
        };
        assert_eq!(report.pharmacy_rows, 2);
        assert_eq!(report.chart_rows, 2);

        let rows = store
            .pharmacy_rows_for_prescription(PrescriptionId::new(100))
            .await
            .unwrap();
        assert_eq!(
            rows[0].prescribed_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn snapshot_reads_are_projected() {
        let store = seeded_store().await;
        let adapter = adapter(&store, &InMemoryBroker::new()).await;

        let outcome = adapter
            .handle(&message(PRESCRIPTIONS_TOPIC, prescription_row("r")))
            .await
            .unwrap();

        assert_eq!(outcome.as_str(), "projected");
    }

    #[tokio::test]
    async fn updates_deletes_and_deleted_rows_write_nothing() {
        let store = seeded_store().await;
        let adapter = adapter(&store, &InMemoryBroker::new()).await;
        let mut deleted = prescription_row("c");
        deleted["__deleted"] = json!("true");

        for body in [prescription_row("u"), prescription_row("d"), deleted] {
            let outcome = adapter
                .handle(&message(PRESCRIPTIONS_TOPIC, body))
                .await
                .unwrap();
            assert_eq!(outcome, MessageOutcome::Skipped);
        }
        assert_eq!(store.pharmacy_row_count().await, 0);
        assert_eq!(store.chart_row_count().await, 0);
    }

    #[tokio::test]
    async fn line_item_row_uses_parent_timestamp() {
        let store = seeded_store().await;
        let adapter = adapter(&store, &InMemoryBroker::new()).await;

        let outcome = adapter
            .handle(&message(ITEMS_TOPIC, item_row()))
            .await
            .unwrap();

        let MessageOutcome::Projected(report) = outcome else {
            panic!("expected projection, got {outcome:?}");
        };
        assert_eq!(report.pharmacy_rows, 1);
        let chart = store.chart_rows_for_patient(PatientId::new(2)).await.unwrap();
        assert_eq!(chart.len(), 1);
        assert_eq!(chart[0].medication_name, "Ibuprofen");
        assert_eq!(
            chart[0].prescribed_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn line_item_for_unknown_prescription_is_dropped() {
        let store = seeded_store().await;
        let adapter = adapter(&store, &InMemoryBroker::new()).await;
        let mut body = item_row();
        body["prescription_id"] = json!(999);

        let outcome = adapter.handle(&message(ITEMS_TOPIC, body)).await.unwrap();

        assert!(matches!(outcome, MessageOutcome::Dropped(_)));
    }

    #[tokio::test]
    async fn unknown_table_and_bad_timestamp_are_dropped() {
        let store = seeded_store().await;
        let adapter = adapter(&store, &InMemoryBroker::new()).await;
        let mut bad_timestamp = prescription_row("c");
        bad_timestamp["prescribed_at"] = json!("01/05/2024 08:00");

        let unknown = adapter
            .handle(&message("hospital_db.public.patients", json!({"id": 2})))
            .await
            .unwrap();
        let undecodable = adapter
            .handle(&message(PRESCRIPTIONS_TOPIC, bad_timestamp))
            .await
            .unwrap();

        assert!(matches!(unknown, MessageOutcome::Dropped(_)));
        assert!(matches!(undecodable, MessageOutcome::Dropped(_)));
        assert_eq!(store.pharmacy_row_count().await, 0);
    }

    #[tokio::test]
    async fn store_outage_is_retried() {
        let store = seeded_store().await;
        let adapter = adapter(&store, &InMemoryBroker::new()).await;
        store.inject(Fault::PrescriptionReads).await;

        let result = adapter
            .handle(&message(PRESCRIPTIONS_TOPIC, prescription_row("c")))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn undecodable_stored_rows_are_dropped() {
        let store = seeded_store().await;
        let adapter = adapter(&store, &InMemoryBroker::new()).await;
        store.inject(Fault::CorruptPrescriptions).await;

        let prescription = adapter
            .handle(&message(PRESCRIPTIONS_TOPIC, prescription_row("c")))
            .await
            .unwrap();
        let item = adapter
            .handle(&message(ITEMS_TOPIC, item_row()))
            .await
            .unwrap();

        assert!(matches!(prescription, MessageOutcome::Dropped(_)));
        assert!(matches!(item, MessageOutcome::Dropped(_)));
        assert_eq!(store.pharmacy_row_count().await, 0);
    }

    #[tokio::test]
    async fn chart_failure_does_not_stop_pharmacy_rows() {
        let store = seeded_store().await;
        let adapter = adapter(&store, &InMemoryBroker::new()).await;
        store.inject(Fault::ChartWrites).await;

        let outcome = adapter
            .handle(&message(PRESCRIPTIONS_TOPIC, prescription_row("c")))
            .await
            .unwrap();

        let MessageOutcome::Projected(report) = outcome else {
            panic!("expected projection, got {outcome:?}");
        };
        assert_eq!(report.pharmacy_rows, 2);
        assert_eq!(report.chart_rows, 0);
        assert_eq!(report.failures, 2);
    }

    #[tokio::test]
    async fn run_redelivers_after_transient_failure() {
        let store = seeded_store().await;
        let broker = InMemoryBroker::new();
        let adapter = adapter(&store, &broker).await;
        store.inject(Fault::PrescriptionReads).await;
        broker
            .append(
                PRESCRIPTIONS_TOPIC,
                serde_json::to_vec(&prescription_row("c")).unwrap(),
            )
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { adapter.run(rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.pharmacy_row_count().await, 0);

        store.clear(Fault::PrescriptionReads).await;
        for _ in 0..100 {
            if store.pharmacy_row_count().await == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(store.pharmacy_row_count().await, 2);
        assert_eq!(store.chart_row_count().await, 2);
    }
}
