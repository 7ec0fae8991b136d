//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the parsed config, the session store, the SMART client, and the
//! key that signs session cookies. The store and client are trait objects so
//! tests can swap in memory-only or scripted implementations.

use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use crate::config::GatewayConfig;
use crate::services::session::{SessionStore, cookie_key};
use crate::services::smart::SmartClient;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub sessions: Arc<dyn SessionStore>,
    pub smart: Arc<dyn SmartClient>,
    pub cookie_key: Key,
}

impl AppState {
    #[must_use]
    pub fn new(config: GatewayConfig, sessions: Arc<dyn SessionStore>, smart: Arc<dyn SmartClient>) -> Self {
        let cookie_key = cookie_key(&config.session_secret);
        Self { config: Arc::new(config), sessions, smart, cookie_key }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
