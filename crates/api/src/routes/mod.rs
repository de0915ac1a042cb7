//! HTTP route handlers.

pub mod observability;
pub mod prescriptions;
pub mod queries;
