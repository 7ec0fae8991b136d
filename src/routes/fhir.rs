//! FHIR session routes: start, callback, check, stop, patient reads.
//!
//! Every failure collapses to a fixed JSON body. The underlying error is
//! logged at `error!` and never leaks to the browser.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tracing::error;

use crate::services::fhir::{self as fhir_svc, GatewayError};
use crate::services::session::{SESSION_COOKIE_NAME, Session};
use crate::services::smart::{AccessMarker, CallbackParams, SmartError};
use crate::state::AppState;

const START_FAILED: &str = "Failed to connect to FHIR client";
const CALLBACK_FAILED: &str = "Failed to complete FHIR authorization";
const STOP_FAILED: &str = "Failed to stop FHIR client";
const PATIENTS_FAILED: &str = "Failed to get patients";
const PATIENT_FAILED: &str = "Failed to get patient by ID";

fn failure(message: &'static str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_owned())]).into_response()
}

fn session_id(jar: &SignedCookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE_NAME).map(|c| c.value().to_owned())
}

/// Remaining lifetime of a session record, never negative.
pub(crate) fn cookie_max_age(expires_at: OffsetDateTime, now: OffsetDateTime) -> Duration {
    (expires_at - now).max(Duration::ZERO)
}

/// The cookie expires with the record it points at, including on reuse.
fn session_cookie(state: &AppState, session: &Session) -> Cookie<'static> {
    let max_age = cookie_max_age(session.expires_at, OffsetDateTime::now_utc());
    Cookie::build((SESSION_COOKIE_NAME, session.id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.cookie_secure)
        .max_age(max_age)
        .build()
}

async fn current_session(state: &AppState, jar: &SignedCookieJar) -> Result<Option<Session>, GatewayError> {
    Ok(fhir_svc::load_session(state, session_id(jar).as_deref()).await?)
}

async fn ready_marker(
    state: &AppState,
    jar: &SignedCookieJar,
    callback: &CallbackParams,
) -> Result<AccessMarker, GatewayError> {
    let session = current_session(state, jar).await?;
    fhir_svc::ready(state, session, callback).await
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /fhir/start`: create the session if needed and redirect to the
/// authorization server.
pub async fn start(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    let result = async {
        let existing = current_session(&state, &jar).await?;
        fhir_svc::start(&state, existing).await
    }
    .await;

    match result {
        Ok((session, redirect_url)) => {
            let jar = jar.add(session_cookie(&state, &session));
            (jar, found(&redirect_url)).into_response()
        }
        Err(e) => {
            error!(error = %e, "fhir start failed");
            failure(START_FAILED)
        }
    }
}

/// `GET /fhir/callback`: finish the authorization round-trip and send the
/// browser back to the app.
pub async fn callback(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let result = async {
        let mut session = current_session(&state, &jar)
            .await?
            .ok_or(SmartError::StateMismatch)?;
        fhir_svc::complete(&state, &mut session, &params).await
    }
    .await;

    match result {
        Ok(()) => found(&state.config.app_url),
        Err(e) => {
            error!(error = %e, "fhir callback failed");
            failure(CALLBACK_FAILED)
        }
    }
}

/// `GET /fhir/check-session`: 200 when authenticated, 401 otherwise.
pub async fn check_session(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    let session = match current_session(&state, &jar).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "session load failed during check");
            None
        }
    };

    if fhir_svc::check(session.as_ref()) {
        (StatusCode::OK, Json(json!({ "authenticated": true }))).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "authenticated": false }))).into_response()
    }
}

/// `POST /fhir/stop`: destroy the whole session and clear its cookie.
pub async fn stop(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    match fhir_svc::stop(&state, session_id(&jar).as_deref()).await {
        Ok(()) => {
            let jar = jar.remove(Cookie::build(SESSION_COOKIE_NAME).path("/"));
            (jar, Json(json!({ "message": "FHIR client stopped" }))).into_response()
        }
        Err(e) => {
            error!(error = %e, "fhir stop failed");
            failure(STOP_FAILED)
        }
    }
}

/// `GET /fhir/patients`: patient search bundle, verbatim.
pub async fn patients(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let result = async {
        let marker = ready_marker(&state, &jar, &params).await?;
        fhir_svc::fetch_patients(&state, &marker).await
    }
    .await;

    match result {
        Ok(bundle) => Json(bundle).into_response(),
        Err(e) => {
            error!(error = %e, "fetch patients failed");
            failure(PATIENTS_FAILED)
        }
    }
}

/// `GET /fhir/patients/{id}`: single patient, verbatim.
pub async fn patient_by_id(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(id): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let result = async {
        let marker = ready_marker(&state, &jar, &params).await?;
        fhir_svc::fetch_patient_by_id(&state, &marker, &id).await
    }
    .await;

    match result {
        Ok(patient) => Json(patient).into_response(),
        Err(e) => {
            error!(error = %e, patient_id = %id, "fetch patient by id failed");
            failure(PATIENT_FAILED)
        }
    }
}

#[cfg(test)]
#[path = "fhir_test.rs"]
mod tests;
