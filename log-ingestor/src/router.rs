use std::future::ready;
use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use log_common::health::HealthRegistry;
use log_common::metrics::setup_metrics_routes;
use log_common::store::LogStore;
use metrics_exporter_prometheus::BuildError;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::{ingest, query};
use crate::queue::RecordQueue;

#[derive(Clone)]
pub struct State {
    pub queue: Arc<RecordQueue>,
    pub store: Arc<dyn LogStore>,
    pub index: String,
}

async fn index() -> &'static str {
    "log-ingestor"
}

pub fn router(state: State, liveness: HealthRegistry, metrics: bool) -> Result<Router, BuildError> {
    // The dashboard is served from another origin
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
        .allow_origin(Any);

    let status_router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));

    let logs_router = Router::new()
        .route("/add-log", post(ingest::add_log))
        .route("/logs-count", get(query::count_logs))
        .route("/all-logs", get(query::list_logs))
        .with_state(state);

    let router = Router::new()
        .merge(status_router)
        .merge(logs_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Don't install metrics unless asked to
    // Installing a global recorder in tests does not work well
    if metrics {
        setup_metrics_routes(router)
    } else {
        Ok(router)
    }
}
