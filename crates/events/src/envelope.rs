use chrono::{DateTime, Utc};
use common::{MedicationId, PatientId, PrescriberId, PrescriptionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DecodeError, Result};

/// Event type tag for a newly created prescription.
pub const PRESCRIPTION_CREATED: &str = "prescription.created";

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Unique identifier for a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One medication line of a prescription as carried in events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrescribedMedication {
    pub medication_id: MedicationId,
    pub schedule: String,
    pub dosage: String,
}

impl PrescribedMedication {
    pub fn new(
        medication_id: MedicationId,
        schedule: impl Into<String>,
        dosage: impl Into<String>,
    ) -> Self {
        Self {
            medication_id,
            schedule: schedule.into(),
            dosage: dosage.into(),
        }
    }
}

/// Payload of a `prescription.created` event (schema version 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrescriptionCreatedData {
    pub prescription_id: PrescriptionId,
    pub prescriber_id: PrescriberId,
    pub patient_id: PatientId,
    pub prescribed_at: DateTime<Utc>,
    pub medications: Vec<PrescribedMedication>,
}

/// Domain events that travel through the broker.
///
/// Each variant has exactly one payload structure per schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrescriptionEvent {
    Created(PrescriptionCreatedData),
}

impl PrescriptionEvent {
    /// Returns the wire tag for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            PrescriptionEvent::Created(_) => PRESCRIPTION_CREATED,
        }
    }

    /// Returns the aggregate this event belongs to.
    pub fn prescription_id(&self) -> PrescriptionId {
        match self {
            PrescriptionEvent::Created(data) => data.prescription_id,
        }
    }
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Broker message body: `{id, type, schema_version, timestamp, data}`.
///
/// `data` stays untyped on the envelope so that unknown event types can be
/// relayed verbatim; [`EventEnvelope::decode`] turns it into a
/// [`PrescriptionEvent`] and fails closed on anything it does not recognize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Envelopes written before versioning carry no field and are read as v1.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    pub timestamp: DateTime<Utc>,

    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Wraps an event in a fresh envelope stamped with the current time.
    pub fn new(event: &PrescriptionEvent) -> Result<Self> {
        let data = match event {
            PrescriptionEvent::Created(data) => serde_json::to_value(data)?,
        };

        Ok(Self {
            id: EventId::new(),
            event_type: event.event_type().to_string(),
            schema_version: SCHEMA_VERSION,
            timestamp: Utc::now(),
            data,
        })
    }

    /// Parses an envelope from raw message bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serializes the envelope to message bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes the typed event carried by this envelope.
    pub fn decode(&self) -> Result<PrescriptionEvent> {
        match (self.event_type.as_str(), self.schema_version) {
            (PRESCRIPTION_CREATED, 1) => {
                let data: PrescriptionCreatedData = serde_json::from_value(self.data.clone())?;
                if data.medications.is_empty() {
                    return Err(DecodeError::InvalidPayload(format!(
                        "prescription {} carries no medications",
                        data.prescription_id
                    )));
                }
                Ok(PrescriptionEvent::Created(data))
            }
            (PRESCRIPTION_CREATED, version) => Err(DecodeError::UnsupportedVersion {
                event_type: self.event_type.clone(),
                version,
            }),
            (other, _) => Err(DecodeError::UnknownEventType(other.to_string())),
        }
    }
}
