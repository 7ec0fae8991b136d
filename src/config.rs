//! Gateway configuration parsed from environment variables.
//!
//! Values the SMART client consumes (issuer, client id, scope) are not
//! validated here. A missing issuer is carried as `None` and only fails when
//! the start flow delegates to the client.

use url::Url;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_REDIRECT_PATH: &str = "/fhir/callback";
pub const DEFAULT_CLIENT_ID: &str = "patient-portal";
pub const DEFAULT_SCOPE: &str = "openid fhirUser launch/patient patient/*.read user/*.read";
pub const DEFAULT_APP_URL: &str = "/";
pub const DEFAULT_SESSION_SECRET: &str = "default_secret";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_FHIR_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_FHIR_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid PORT: {0}")]
    InvalidPort(String),
    #[error("invalid {var}: {value:?} is not a number")]
    InvalidNumber { var: &'static str, value: String },
    #[error("invalid {var}: {reason}")]
    InvalidUrl { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// FHIR server base URI handed to `authorize` as the issuer.
    pub issuer: Option<String>,
    /// Absolute post-auth redirect URI registered with the authorization server.
    pub redirect_uri: String,
    pub client_id: String,
    pub scope: String,
    /// Where the browser lands once the callback completes.
    pub app_url: String,
    /// Externally visible base URL of this gateway.
    pub public_url: String,
    pub session_secret: String,
    pub session_ttl_secs: u64,
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub cookie_secure: bool,
    /// Browser origin allowed to send credentials. `None` allows any origin
    /// without credentials.
    pub cors_origin: Option<String>,
    pub timeouts: UpstreamTimeouts,
}

impl GatewayConfig {
    /// Build typed config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` or a numeric knob does not parse, or if
    /// `PUBLIC_URL` / `FHIR_REDIRECT_URI` cannot form an absolute URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build typed config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };

        let public_url = get("PUBLIC_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();
        let redirect_uri = resolve_redirect_uri(
            &public_url,
            get("FHIR_REDIRECT_URI").as_deref().unwrap_or(DEFAULT_REDIRECT_PATH),
        )?;

        let cookie_secure = match get("COOKIE_SECURE").as_deref().and_then(parse_bool) {
            Some(value) => value,
            None => public_url.starts_with("https://"),
        };

        Ok(Self {
            issuer: get("FHIR_CLIENT_URI"),
            redirect_uri,
            client_id: get("FHIR_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_owned()),
            scope: get("FHIR_SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.to_owned()),
            app_url: get("APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_owned()),
            public_url,
            session_secret: get("SESSION_SECRET").unwrap_or_else(|| DEFAULT_SESSION_SECRET.to_owned()),
            session_ttl_secs: parse_number(&get, "SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?,
            port,
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_number(&get, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            cookie_secure,
            cors_origin: get("CORS_ORIGIN"),
            timeouts: UpstreamTimeouts {
                request_secs: parse_number(&get, "FHIR_REQUEST_TIMEOUT_SECS", DEFAULT_FHIR_REQUEST_TIMEOUT_SECS)?,
                connect_secs: parse_number(&get, "FHIR_CONNECT_TIMEOUT_SECS", DEFAULT_FHIR_CONNECT_TIMEOUT_SECS)?,
            },
        })
    }

    #[must_use]
    pub fn uses_default_secret(&self) -> bool {
        self.session_secret == DEFAULT_SESSION_SECRET
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
        None => Ok(default),
    }
}

/// Absolute redirect URIs pass through; relative ones resolve against `public_url`.
fn resolve_redirect_uri(public_url: &str, raw: &str) -> Result<String, ConfigError> {
    if let Ok(absolute) = Url::parse(raw) {
        return Ok(absolute.to_string());
    }
    let base = Url::parse(&format!("{public_url}/"))
        .map_err(|e| ConfigError::InvalidUrl { var: "PUBLIC_URL", reason: e.to_string() })?;
    base.join(raw)
        .map(|u| u.to_string())
        .map_err(|e| ConfigError::InvalidUrl { var: "FHIR_REDIRECT_URI", reason: e.to_string() })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
