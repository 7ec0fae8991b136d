mod config;
mod db;
mod routes;
mod services;
mod state;

use std::sync::Arc;
use std::time::Duration;

use services::pg_session::PgSessionStore;
use services::session::{MemorySessionStore, SessionStore, spawn_session_sweeper};
use services::smart::HttpSmartClient;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::GatewayConfig::from_env().expect("invalid configuration");
    if config.issuer.is_none() {
        tracing::warn!("FHIR_CLIENT_URI not set; /fhir/start will fail until it is configured");
    }
    if config.uses_default_secret() {
        tracing::warn!("SESSION_SECRET not set; session cookies are signed with the default secret");
    }

    let sessions: Arc<dyn SessionStore> = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            tracing::info!("sessions stored in postgres");
            Arc::new(PgSessionStore::new(pool))
        }
        None => {
            tracing::info!("sessions stored in memory");
            Arc::new(MemorySessionStore::new())
        }
    };
    let _sweeper = spawn_session_sweeper(sessions.clone(), SESSION_SWEEP_INTERVAL);

    let smart = HttpSmartClient::new(config.timeouts).expect("http client build failed");

    let port = config.port;
    let state = state::AppState::new(config, sessions, Arc::new(smart));
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "patient portal gateway listening");
    axum::serve(listener, app).await.expect("server failed");
}
