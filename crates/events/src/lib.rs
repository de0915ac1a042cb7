//! Shared event and payload model.
//!
//! Every propagation strategy ends up handing the projector the same
//! [`ChangeNotification`]. This crate owns the wire formats that lead there:
//! - [`EventEnvelope`]: the JSON body published to the broker by the direct
//!   publisher and the outbox relay, decoded into a tagged [`PrescriptionEvent`]
//! - [`CdcRecord`]: a flattened row-change record emitted by log-capture
//!   infrastructure, decoded into typed table rows
//! - [`timestamp`]: normalization of the timestamp encodings found in CDC rows

pub mod cdc;
pub mod envelope;
pub mod error;
pub mod notification;
pub mod timestamp;

pub use cdc::{CaptureMetadata, CdcRecord, Operation, PrescriptionItemRow, PrescriptionRow};
pub use envelope::{
    EventEnvelope, EventId, PRESCRIPTION_CREATED, PrescribedMedication, PrescriptionCreatedData,
    PrescriptionEvent, SCHEMA_VERSION,
};
pub use error::{DecodeError, Result};
pub use notification::{ChangeKind, ChangeNotification};
