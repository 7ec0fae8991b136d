//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The gateway exposes a small JSON API under `/fhir` plus a liveness probe.
//! A browser front end calls it with credentials; the session cookie is the
//! only client-side state.

pub mod fhir;

use axum::Router;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::response::Json;
use axum::routing::{get, post};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

/// Full gateway router with CORS and request tracing.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        .nest("/fhir", fhir_routes())
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn fhir_routes() -> Router<AppState> {
    Router::new()
        .route("/start", get(fhir::start))
        .route("/callback", get(fhir::callback))
        .route("/check-session", get(fhir::check_session))
        .route("/stop", post(fhir::stop))
        .route("/patients", get(fhir::patients))
        .route("/patients/{id}", get(fhir::patient_by_id))
}

/// A configured origin gets credentialed CORS; otherwise any origin may call
/// without credentials.
pub(crate) fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let permissive = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let Some(origin) = origin else {
        return permissive;
    };
    match HeaderValue::from_str(origin) {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([CONTENT_TYPE]),
        Err(e) => {
            warn!(error = %e, origin, "invalid CORS_ORIGIN; allowing any origin without credentials");
            permissive
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
