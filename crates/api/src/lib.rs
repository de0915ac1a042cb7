//! HTTP command/query surface for the hospital prescription service.
//!
//! Commands go through [`PrescriptionService`] on the configured write path;
//! queries read the pharmacy and patient chart views through
//! [`QueryService`]. Structured logging comes from tracing and metrics are
//! exported in Prometheus format.

pub mod config;
pub mod error;
pub mod routes;
pub mod wiring;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{PrescriptionService, WritePath};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::QueryService;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub prescriptions: PrescriptionService<S>,
    pub queries: QueryService<S>,
}

impl<S: Store + Clone> AppState<S> {
    pub fn new(store: S, write_path: WritePath) -> Self {
        Self {
            prescriptions: PrescriptionService::new(store.clone(), write_path),
            queries: QueryService::new(store),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::observability::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::observability::health::<S>))
        .route("/prescriptions", post(routes::prescriptions::create::<S>))
        .route("/prescribers", get(routes::prescriptions::list_prescribers::<S>))
        .route("/patients", get(routes::prescriptions::list_patients::<S>))
        .route("/medications", get(routes::prescriptions::list_medications::<S>))
        .route("/pharmacy/prescriptions", get(routes::queries::pharmacy_list::<S>))
        .route("/pharmacy/prescriptions/{id}", get(routes::queries::pharmacy_get::<S>))
        .route("/patients/{id}/chart", get(routes::queries::patient_chart::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
