//! Read models for prescriptions.
//!
//! - [`Projection`]: fans a [`events::ChangeNotification`] out to the views
//! - [`EventProjector`]: the projection writing the pharmacy and patient chart views
//! - [`QueryService`]: read-only queries over both views

pub mod error;
pub mod projection;
pub mod projector;
pub mod query;

pub use error::{ProjectionError, Result};
pub use projection::{Projection, ProjectionReport};
pub use projector::EventProjector;
pub use query::{
    ChartPatient, ChartPrescriber, ChartPrescription, PatientChart, PharmacyPatient,
    PharmacyPrescription, QueryService, ViewMedication,
};
