//! Write path for prescriptions.
//!
//! [`PrescriptionService`] validates a [`CreatePrescription`] command against
//! the reference data and commits it through one of three [`WritePath`]s:
//! - direct publish: commit, then run a [`CommitHook`] (best effort)
//! - outbox: commit the aggregate together with an outbox record
//! - change capture: commit only

pub mod command;
pub mod error;
pub mod hook;
pub mod service;

pub use command::CreatePrescription;
pub use error::{DomainError, HookError};
pub use hook::{CommitHook, WritePath};
pub use service::PrescriptionService;
