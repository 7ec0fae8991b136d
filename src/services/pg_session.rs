//! Postgres-backed session store.
//!
//! Rows expire by timestamp; `load` filters them out and the sweeper task
//! deletes them in bulk.

use sqlx::types::Json;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;

use super::session::{Session, SessionData, SessionError, SessionStore};

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let row = sqlx::query("SELECT id, data, expires_at FROM sessions WHERE id = $1 AND expires_at > now()")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| {
            let Json(data): Json<SessionData> = r.get("data");
            let expires_at: OffsetDateTime = r.get("expires_at");
            Session { id: r.get("id"), data, expires_at }
        }))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        sqlx::query(
            r"INSERT INTO sessions (id, data, expires_at)
              VALUES ($1, $2, $3)
              ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, expires_at = EXCLUDED.expires_at",
        )
        .bind(&session.id)
        .bind(Json(&session.data))
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "pg_session_test.rs"]
mod tests;
