//! Server-side sessions keyed by an opaque cookie-carried id.
//!
//! ARCHITECTURE
//! ============
//! The browser only ever holds a signed random id. Everything the SMART
//! client leaves behind (the in-flight authorization and, after the
//! callback, the access marker) lives in the `Session` record held by a
//! `SessionStore`. The memory store is the default; `PgSessionStore` is used
//! when a database is configured.
//!
//! TRADE-OFFS
//! ==========
//! Sessions are only persisted once the start flow writes to them, so
//! anonymous health checks and session probes never allocate records.
//! `destroy` removes the whole record, not just the FHIR marker.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use axum_extra::extract::cookie::Key;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::smart::{AccessMarker, PendingAuthorization};

pub const SESSION_COOKIE_NAME: &str = "portal.sid";
const SHORT_ID_LEN: usize = 8;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Derive the cookie signing key from the configured session secret.
#[must_use]
pub fn cookie_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session database error: {0}")]
    Db(#[from] sqlx::Error),
}

// =============================================================================
// SESSION
// =============================================================================

/// Everything persisted for one browser session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub authenticated: bool,
    /// Access marker recorded by the SMART client after a completed round-trip.
    pub marker: Option<AccessMarker>,
    /// Authorization started by `start` and not yet completed.
    pub pending: Option<PendingAuthorization>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub data: SessionData,
    pub expires_at: OffsetDateTime,
}

impl Session {
    /// Fresh, unauthenticated session living for `ttl_secs`.
    #[must_use]
    pub fn new(ttl_secs: u64) -> Self {
        let ttl = time::Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX));
        let expires_at = OffsetDateTime::now_utc().saturating_add(ttl);
        Self { id: generate_token(), data: SessionData::default(), expires_at }
    }

    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    /// True only when the SMART client left an access marker behind.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.data.authenticated && self.data.marker.is_some()
    }

    /// Record a completed authorization.
    pub fn mark_authenticated(&mut self, marker: AccessMarker) {
        self.data.marker = Some(marker);
        self.data.authenticated = true;
        self.data.pending = None;
    }

    /// Prefix of the id that is safe to log.
    #[must_use]
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

#[must_use]
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

// =============================================================================
// STORE
// =============================================================================

/// Backend-neutral session storage. Enables swapping memory and Postgres.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a live session. Expired sessions load as `None`.
    async fn load(&self, id: &str) -> Result<Option<Session>, SessionError>;

    /// Insert or replace a session.
    async fn save(&self, session: &Session) -> Result<(), SessionError>;

    /// Remove a session atomically. Removing an unknown id succeeds.
    async fn destroy(&self, id: &str) -> Result<(), SessionError>;

    /// Remove every expired session, returning how many were dropped.
    async fn purge_expired(&self) -> Result<u64, SessionError>;
}

/// Process-local session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let sessions = self.sessions.read().await;
        let now = OffsetDateTime::now_utc();
        Ok(sessions.get(id).filter(|s| !s.is_expired(now)).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, SessionError> {
        let mut sessions = self.sessions.write().await;
        let now = OffsetDateTime::now_utc();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

/// Spawn the background task that purges expired sessions every `interval`.
pub fn spawn_session_sweeper(store: Arc<dyn SessionStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "expired sessions purged"),
                Err(e) => error!(error = %e, "session purge failed"),
            }
        }
    })
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
