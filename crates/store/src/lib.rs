//! Source store and read store.
//!
//! One relational database holds the reference tables, the normalized
//! prescription tables, the transactional outbox and the two read views.
//! [`PostgresStore`] is the production implementation; [`InMemoryStore`]
//! mirrors its behavior for tests and supports fault injection.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{Fault, InMemoryStore};
pub use model::{
    ChartViewRow, Medication, NewOutboxRecord, NewPrescription, OutboxPolicy, OutboxRecord,
    Patient, PharmacyViewRow, Prescriber, Prescription,
};
pub use postgres::PostgresStore;
pub use store::{OutboxStore, PrescriptionStore, ReadStore, ReferenceData, Store};
