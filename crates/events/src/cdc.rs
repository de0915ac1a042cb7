//! Flattened row-change records produced by log-capture infrastructure.
//!
//! Each record is one JSON object holding the row's current column values
//! plus reserved metadata keys prefixed with `__`.

use chrono::{DateTime, Utc};
use common::{MedicationId, PatientId, PrescriberId, PrescriptionId};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{DecodeError, Result, timestamp};

/// Reserved key holding the operation code.
pub const OP_KEY: &str = "__op";
/// Reserved key holding the soft-delete flag.
pub const DELETED_KEY: &str = "__deleted";
/// Reserved key holding the source commit time in epoch milliseconds.
pub const SOURCE_TS_KEY: &str = "__source_ts_ms";

const METADATA_PREFIX: &str = "__";

/// Row-level operation captured from the replication log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    /// Snapshot read of a pre-existing row.
    Read,
    Update,
    Delete,
}

impl Operation {
    /// Parses a single-letter operation code.
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "c" => Ok(Operation::Create),
            "r" => Ok(Operation::Read),
            "u" => Ok(Operation::Update),
            "d" => Ok(Operation::Delete),
            other => Err(DecodeError::UnknownOperation(other.to_string())),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Operation::Create => "c",
            Operation::Read => "r",
            Operation::Update => "u",
            Operation::Delete => "d",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Capture metadata carried alongside a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMetadata {
    pub operation: Operation,
    pub deleted: bool,
    pub source_ts: Option<DateTime<Utc>>,
}

impl CaptureMetadata {
    /// Only inserts and snapshot reads of live rows reach the read models.
    pub fn is_projectable(&self) -> bool {
        matches!(self.operation, Operation::Create | Operation::Read) && !self.deleted
    }
}

/// A decoded CDC message: metadata plus the row's own columns.
#[derive(Debug, Clone)]
pub struct CdcRecord {
    pub metadata: CaptureMetadata,
    columns: Map<String, Value>,
}

impl CdcRecord {
    /// Parses a flattened CDC message body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Splits a flattened JSON object into metadata and columns.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(raw) = value else {
            return Err(DecodeError::InvalidPayload(
                "CDC message is not a JSON object".to_string(),
            ));
        };

        let operation = match raw.get(OP_KEY) {
            Some(Value::String(code)) => Operation::from_code(code)?,
            Some(other) => return Err(DecodeError::UnknownOperation(other.to_string())),
            None => return Err(DecodeError::MissingMetadata(OP_KEY)),
        };

        let deleted = match raw.get(DELETED_KEY) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(flag)) => flag.eq_ignore_ascii_case("true"),
            Some(other) => {
                return Err(DecodeError::InvalidPayload(format!(
                    "{DELETED_KEY} must be a boolean, got {other}"
                )));
            }
        };

        let source_ts = match raw.get(SOURCE_TS_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::Number(ms)) => {
                let ms = ms
                    .as_i64()
                    .ok_or_else(|| DecodeError::InvalidTimestamp(ms.to_string()))?;
                Some(timestamp::from_epoch_millis(ms)?)
            }
            Some(other) => return Err(DecodeError::InvalidTimestamp(other.to_string())),
        };

        let columns = raw
            .into_iter()
            .filter(|(key, _)| !key.starts_with(METADATA_PREFIX))
            .collect();

        Ok(Self {
            metadata: CaptureMetadata {
                operation,
                deleted,
                source_ts,
            },
            columns,
        })
    }

    /// Returns the row's columns without metadata keys.
    pub fn columns(&self) -> &Map<String, Value> {
        &self.columns
    }

    /// Decodes the columns into a typed row.
    pub fn decode_row<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.columns.clone()))?)
    }
}

/// A captured row of the `prescriptions` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrescriptionRow {
    pub id: PrescriptionId,
    pub prescriber_id: PrescriberId,
    pub patient_id: PatientId,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub prescribed_at: DateTime<Utc>,
}

/// A captured row of the `prescription_medications` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PrescriptionItemRow {
    pub prescription_id: PrescriptionId,
    pub medication_id: MedicationId,
    pub schedule: String,
    pub dosage: String,
}
