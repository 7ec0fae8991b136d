//! Client session store for the patient portal.
//!
//! SYSTEM CONTEXT
//! ==============
//! A browser-side view of the gateway: whether the tab is authenticated, the
//! last patient bundle, and the selected patient. Every call goes through the
//! gateway with the session cookie attached; the store never talks to the FHIR
//! server directly.
//!
//! `net` holds the gateway API seam and its HTTP implementation. `state`
//! holds the pending tracker and the store itself. Rendering is left to the
//! host application, which reads snapshots from the store.

pub mod net;
pub mod state;

pub use net::api::{ApiError, ApiResponse, GatewayApi, HttpGateway};
pub use state::fhir::{FhirState, FhirStore, Navigator, TeardownError};
pub use state::pending::{PendingState, PendingTracker};
