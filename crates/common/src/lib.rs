//! Strongly typed identifiers shared by every crate in the workspace.

mod types;

pub use types::{MedicationId, OutboxId, PatientId, PrescriberId, PrescriptionId};
