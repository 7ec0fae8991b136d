//! Authentication and patient view-state for one browser tab.
//!
//! DESIGN
//! ======
//! `FhirState` is a plain struct with pure reducers. `FhirStore` wraps it with
//! the gateway API and the pending tracker. Every operation follows the same
//! shape: take a pending guard, call the gateway, reduce the outcome into
//! state. Failures never surface as errors except from `logout`; they show up
//! as empty or false fields.
//!
//! CONCURRENCY
//! ===========
//! Overlapping calls are resolved latest-wins per slot (authentication,
//! patient list, selected patient). Each call takes a ticket for its slot
//! before awaiting the gateway and only applies its result if no newer
//! ticket was issued meanwhile. `logout` invalidates every slot, so a fetch
//! that resolves after logout cannot repopulate state.

#[cfg(test)]
#[path = "fhir_test.rs"]
mod fhir_test;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fhir_types::{Patient, PatientBundle};
use tracing::{debug, warn};

use super::pending::{PendingState, PendingTracker};
use crate::net::api::{ApiError, ApiResponse, GatewayApi};

pub const CHECKING_SESSION: &str = "Checking session...";
pub const FETCHING_PATIENTS: &str = "Fetching patients...";
pub const FETCHING_PATIENT: &str = "Fetching patient by ID...";
pub const LOGGING_OUT: &str = "Logging out...";

/// The gateway could not tear the session down. Local state was reset anyway.
#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("stop request failed: {0}")]
    Transport(#[from] ApiError),
    #[error("gateway refused to stop the session (status {status})")]
    Rejected { status: u16, body: String },
}

/// Browser navigation, used to send the tab to the start endpoint.
pub trait Navigator: Send + Sync {
    fn navigate(&self, url: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn navigate(&self, url: &str) {
        self(url);
    }
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FhirState {
    pub is_authenticated: bool,
    /// Last patient bundle, verbatim. `None` after any failed fetch.
    pub patients: Option<PatientBundle>,
    /// Last fetched or selected patient, verbatim. `None` after any failed fetch.
    pub selected_patient: Option<Patient>,
}

impl FhirState {
    pub fn apply_check(&mut self, authenticated: bool) {
        self.is_authenticated = authenticated;
    }

    pub fn apply_patients(&mut self, bundle: Option<PatientBundle>) {
        self.patients = bundle;
    }

    pub fn apply_patient(&mut self, patient: Option<Patient>) {
        self.selected_patient = patient;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Decode a successful JSON body. Anything else is `None`.
fn decode_success<T: serde::de::DeserializeOwned>(
    operation: &str,
    result: Result<ApiResponse, ApiError>,
) -> Option<T> {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, operation, "gateway call failed");
            return None;
        }
    };
    if response.is_auth_failure() {
        debug!(status = response.status, operation, "gateway call not authorized");
        return None;
    }
    if !response.is_success() {
        warn!(status = response.status, operation, "gateway call returned failure status");
        return None;
    }
    match response.json() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, operation, "gateway response did not decode");
            None
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Clone, Copy, Debug)]
enum Slot {
    Auth,
    Patients,
    Patient,
}

#[derive(Debug, Default)]
struct Tickets {
    auth: u64,
    patients: u64,
    patient: u64,
}

impl Tickets {
    fn slot_mut(&mut self, slot: Slot) -> &mut u64 {
        match slot {
            Slot::Auth => &mut self.auth,
            Slot::Patients => &mut self.patients,
            Slot::Patient => &mut self.patient,
        }
    }

    fn issue(&mut self, slot: Slot) -> u64 {
        let ticket = self.slot_mut(slot);
        *ticket += 1;
        *ticket
    }

    fn invalidate_all(&mut self) {
        for slot in [Slot::Auth, Slot::Patients, Slot::Patient] {
            self.issue(slot);
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: FhirState,
    tickets: Tickets,
}

/// Constructor-injected store over a gateway API and a navigator.
pub struct FhirStore<A> {
    api: A,
    navigator: Box<dyn Navigator>,
    pending: Arc<PendingTracker>,
    inner: Mutex<Inner>,
}

impl<A: GatewayApi> FhirStore<A> {
    pub fn new(api: A, navigator: impl Navigator + 'static) -> Self {
        Self {
            api,
            navigator: Box::new(navigator),
            pending: PendingTracker::new(),
            inner: Mutex::new(Inner::default()),
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> FhirState {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().state.is_authenticated
    }

    #[must_use]
    pub fn patients(&self) -> Option<PatientBundle> {
        self.lock().state.patients.clone()
    }

    #[must_use]
    pub fn selected_patient(&self) -> Option<Patient> {
        self.lock().state.selected_patient.clone()
    }

    #[must_use]
    pub fn pending(&self) -> PendingState {
        self.pending.state()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_pending()
    }

    /// Status text of the most recently started call, while anything is pending.
    #[must_use]
    pub fn status_text(&self) -> Option<String> {
        self.pending.state().message().map(str::to_owned)
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Send the browser to the gateway's start endpoint. State is untouched;
    /// a later `check_session` picks up the result.
    pub fn start_fhir_client(&self) {
        self.navigator.navigate(&self.api.start_url());
    }

    /// Ask the gateway whether this session is authenticated. Only a 200
    /// counts; every other status and any transport failure is `false`.
    pub async fn check_session(&self) -> bool {
        let _pending = self.pending.begin(CHECKING_SESSION);
        let ticket = self.issue(Slot::Auth);

        let authenticated = match self.api.check_session().await {
            Ok(response) => response.status == 200,
            Err(e) => {
                warn!(error = %e, "session check failed");
                false
            }
        };
        self.commit(Slot::Auth, ticket, |state| state.apply_check(authenticated));
        authenticated
    }

    /// Fetch the patient bundle. Any failure leaves `patients` empty.
    pub async fn fetch_patients(&self) {
        let _pending = self.pending.begin(FETCHING_PATIENTS);
        let ticket = self.issue(Slot::Patients);

        let result = self.api.fetch_patients().await;
        let bundle = decode_success::<PatientBundle>("fetch_patients", result);
        self.commit(Slot::Patients, ticket, |state| state.apply_patients(bundle));
    }

    /// Fetch one patient. Any failure leaves `selected_patient` empty.
    pub async fn fetch_patient_by_id(&self, id: &str) {
        let _pending = self.pending.begin(FETCHING_PATIENT);
        let ticket = self.issue(Slot::Patient);

        let result = self.api.fetch_patient(id).await;
        let patient = decode_success::<Patient>("fetch_patient_by_id", result);
        self.commit(Slot::Patient, ticket, |state| state.apply_patient(patient));
    }

    /// Stop the gateway session and reset all state.
    ///
    /// State is reset whatever the gateway answers.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError`] when the stop call failed or was refused, so
    /// the caller knows the server-side session may still exist.
    pub async fn logout(&self) -> Result<(), TeardownError> {
        let _pending = self.pending.begin(LOGGING_OUT);
        self.lock().tickets.invalidate_all();

        let result = self.api.stop().await;
        self.lock().state.reset();

        match result {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => {
                warn!(status = response.status, "gateway refused to stop session");
                Err(TeardownError::Rejected { status: response.status, body: response.body })
            }
            Err(e) => {
                warn!(error = %e, "stop request failed");
                Err(e.into())
            }
        }
    }

    /// Select a patient already in hand, e.g. from the bundle.
    pub fn set_selected_patient(&self, patient: Patient) {
        self.overwrite(Slot::Patient, |state| state.apply_patient(Some(patient)));
    }

    /// Drop the selected patient, e.g. when navigating away from it.
    pub fn clear_selected_patient(&self) {
        self.overwrite(Slot::Patient, |state| state.apply_patient(None));
    }

    pub fn set_is_authenticated(&self, authenticated: bool) {
        self.overwrite(Slot::Auth, |state| state.apply_check(authenticated));
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue(&self, slot: Slot) -> u64 {
        self.lock().tickets.issue(slot)
    }

    /// Apply `reduce` only if `ticket` is still the latest for `slot`.
    fn commit(&self, slot: Slot, ticket: u64, reduce: impl FnOnce(&mut FhirState)) {
        let mut inner = self.lock();
        if *inner.tickets.slot_mut(slot) == ticket {
            reduce(&mut inner.state);
        } else {
            debug!(?slot, "discarding stale result");
        }
    }

    /// Local writes count as the latest call for their slot.
    fn overwrite(&self, slot: Slot, reduce: impl FnOnce(&mut FhirState)) {
        let mut inner = self.lock();
        inner.tickets.issue(slot);
        reduce(&mut inner.state);
    }
}
