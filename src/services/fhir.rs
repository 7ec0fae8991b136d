//! Session gateway operations: start, complete, check, stop, and the
//! authenticated patient reads.
//!
//! DESIGN
//! ======
//! Per session the gateway is a two-state machine:
//! `Unauthenticated -> (start + completed round-trip) -> Authenticated -> (stop) -> gone`.
//! The in-flight authorization written by `start` is bookkeeping for the
//! SMART client, not a third state; `check` ignores it.
//!
//! Errors are kept typed here and only flattened to fixed HTTP bodies in
//! `routes::fhir`.

use fhir_types::{ResourceType, is_valid_id};
use serde_json::Value;
use tracing::info;

use super::session::{Session, SessionError};
use super::smart::{AccessMarker, AuthorizeParams, CallbackParams, SmartError};
use crate::config::GatewayConfig;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Smart(#[from] SmartError),
}

#[must_use]
pub fn authorize_params(config: &GatewayConfig) -> AuthorizeParams {
    AuthorizeParams {
        issuer: config.issuer.clone(),
        redirect_uri: config.redirect_uri.clone(),
        client_id: config.client_id.clone(),
        scope: config.scope.clone(),
    }
}

/// Load the live session for a cookie-carried id, if any.
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn load_session(state: &AppState, id: Option<&str>) -> Result<Option<Session>, SessionError> {
    match id {
        Some(id) => state.sessions.load(id).await,
        None => Ok(None),
    }
}

/// Begin authorization. Creates the session if the browser has none and
/// records the in-flight authorization in it.
///
/// Returns the persisted session and the URL to redirect the browser to.
///
/// # Errors
///
/// Returns an error if the SMART client cannot authorize (including a
/// missing issuer) or the session cannot be saved.
pub async fn start(state: &AppState, existing: Option<Session>) -> Result<(Session, String), GatewayError> {
    let mut session = existing.unwrap_or_else(|| Session::new(state.config.session_ttl_secs));
    let authorization = state
        .smart
        .authorize(&authorize_params(&state.config))
        .await?;
    session.data.pending = Some(authorization.pending);
    state.sessions.save(&session).await?;
    info!(session = session.short_id(), "fhir authorization started");
    Ok((session, authorization.redirect_url))
}

/// Finish the in-flight authorization from callback parameters and mark the
/// session authenticated.
///
/// # Errors
///
/// Returns [`SmartError::StateMismatch`] if nothing is in flight, any error
/// from the SMART client, or a store failure.
pub async fn complete(state: &AppState, session: &mut Session, callback: &CallbackParams) -> Result<(), GatewayError> {
    let pending = session
        .data
        .pending
        .clone()
        .ok_or(SmartError::StateMismatch)?;
    let marker = state.smart.complete(&pending, callback).await?;
    session.mark_authenticated(marker);
    state.sessions.save(session).await?;
    info!(session = session.short_id(), "fhir authorization completed");
    Ok(())
}

/// Whether the session carries the authentication marker.
#[must_use]
pub fn check(session: Option<&Session>) -> bool {
    session.is_some_and(Session::is_authenticated)
}

/// Resolve an authenticated client handle for this request.
///
/// If the request is itself the authorization redirect (it carries
/// `code`/`state` or `error`) and an authorization is in flight, the
/// round-trip is completed first.
///
/// # Errors
///
/// Returns [`SmartError::NotAuthorized`] when no completed authorization
/// exists, or any completion error.
pub async fn ready(
    state: &AppState,
    session: Option<Session>,
    callback: &CallbackParams,
) -> Result<AccessMarker, GatewayError> {
    let mut session = session.ok_or(SmartError::NotAuthorized)?;
    if callback.is_callback() && session.data.pending.is_some() {
        complete(state, &mut session, callback).await?;
    }
    if !session.is_authenticated() {
        return Err(SmartError::NotAuthorized.into());
    }
    session
        .data
        .marker
        .ok_or_else(|| SmartError::NotAuthorized.into())
}

/// Destroy the whole session record. No session is not an error.
///
/// # Errors
///
/// Returns an error if the store fails to remove the record.
pub async fn stop(state: &AppState, session_id: Option<&str>) -> Result<(), GatewayError> {
    if let Some(id) = session_id {
        state.sessions.destroy(id).await?;
        info!(session = super::session::short_id(id), "fhir session destroyed");
    }
    Ok(())
}

/// Read the patient search bundle.
///
/// # Errors
///
/// Returns any SMART client error.
pub async fn fetch_patients(state: &AppState, marker: &AccessMarker) -> Result<Value, GatewayError> {
    Ok(state
        .smart
        .request(marker, ResourceType::Patient.as_str())
        .await?)
}

/// Read one patient by id. Ids outside the FHIR id grammar are rejected
/// without an upstream call.
///
/// # Errors
///
/// Returns [`SmartError::InvalidResourceId`] or any SMART client error.
pub async fn fetch_patient_by_id(state: &AppState, marker: &AccessMarker, id: &str) -> Result<Value, GatewayError> {
    if !is_valid_id(id) {
        return Err(SmartError::InvalidResourceId(id.to_owned()).into());
    }
    Ok(state
        .smart
        .request(marker, &ResourceType::Patient.instance_path(id))
        .await?)
}

#[cfg(test)]
#[path = "fhir_test.rs"]
mod tests;
