//! SMART-on-FHIR client: endpoint discovery, authorization, token exchange,
//! and authenticated resource reads.
//!
//! DESIGN
//! ======
//! `SmartClient` is the seam the gateway talks to. It mirrors the three
//! operations a SMART client library exposes: `authorize` (produce the
//! redirect and the in-flight record), `complete` (finish the round-trip and
//! yield an access marker), and `request` (read a resource with the marker).
//! The gateway owns persistence of both records in the session; this module
//! never touches the session store.
//!
//! Token validity is not checked here. No refresh, no PKCE: an expired or
//! revoked token simply surfaces as an upstream error on the next read.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::session::generate_token;
use crate::config::UpstreamTimeouts;

const SMART_CONFIGURATION_PATH: &str = ".well-known/smart-configuration";
const METADATA_PATH: &str = "metadata";
const OAUTH_URIS_EXTENSION: &str = "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris";
const FHIR_JSON: &str = "application/fhir+json";

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SmartError {
    /// `authorize` was called without an issuer.
    #[error("no FHIR issuer configured")]
    MissingIssuer,

    /// Neither discovery document yielded OAuth endpoints.
    #[error("endpoint discovery failed: {0}")]
    Discovery(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Callback carried no state, or a state that does not match the session.
    #[error("authorization state mismatch")]
    StateMismatch,

    /// Callback arrived without a code and without an error.
    #[error("authorization callback missing code")]
    MissingCode,

    /// The authorization server redirected back with `error=...`.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// No completed authorization in the session.
    #[error("client is not authorized")]
    NotAuthorized,

    #[error("invalid resource id: {0:?}")]
    InvalidResourceId(String),

    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("upstream responded with status {status}")]
    Upstream { status: u16, body: String },

    #[error("upstream response parse failed: {0}")]
    Parse(String),

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

// =============================================================================
// TYPES
// =============================================================================

/// Inputs to `authorize`, taken from gateway config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeParams {
    pub issuer: Option<String>,
    pub redirect_uri: String,
    pub client_id: String,
    pub scope: String,
}

/// Authorization started but not yet completed. Stored in the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub issuer: String,
    pub token_endpoint: String,
    pub redirect_uri: String,
    pub client_id: String,
}

/// Result of a completed authorization. Stored in the session; its presence
/// is what makes a session authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessMarker {
    /// FHIR base URL resource reads are issued against.
    pub server_url: String,
    pub access_token: String,
    pub token_type: String,
    pub scope: Option<String>,
    /// Patient in context, when the server granted a patient launch.
    pub patient: Option<String>,
    pub expires_in: Option<u64>,
}

/// Output of `authorize`: where to send the browser and what to remember.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub redirect_url: String,
    pub pending: PendingAuthorization,
}

/// Query parameters the authorization server appends to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// True when the request is an authorization redirect rather than a
    /// plain call.
    #[must_use]
    pub fn is_callback(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

/// OAuth endpoints advertised by a FHIR server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

/// Provider-neutral SMART client. Enables mocking in tests.
#[async_trait::async_trait]
pub trait SmartClient: Send + Sync {
    /// Start an authorization against `params.issuer`.
    ///
    /// # Errors
    ///
    /// Returns [`SmartError::MissingIssuer`] without an issuer, or a
    /// discovery / URL error when the server's endpoints cannot be found.
    async fn authorize(&self, params: &AuthorizeParams) -> Result<Authorization, SmartError>;

    /// Finish an authorization from the redirect's query parameters.
    ///
    /// # Errors
    ///
    /// Returns an error on state mismatch, denial, or a failed token exchange.
    async fn complete(
        &self,
        pending: &PendingAuthorization,
        callback: &CallbackParams,
    ) -> Result<AccessMarker, SmartError>;

    /// Read `path` (e.g. `Patient/42`) relative to the marker's server.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-2xx status, or a body that
    /// is not JSON.
    async fn request(&self, marker: &AccessMarker, path: &str) -> Result<Value, SmartError>;
}

// =============================================================================
// PURE HELPERS
// =============================================================================

/// Check a callback against the in-flight authorization and return its code.
///
/// # Errors
///
/// Returns [`SmartError::StateMismatch`], [`SmartError::AuthorizationDenied`]
/// or [`SmartError::MissingCode`].
pub fn validate_callback<'a>(
    pending: &PendingAuthorization,
    callback: &'a CallbackParams,
) -> Result<&'a str, SmartError> {
    if callback.state.as_deref() != Some(pending.state.as_str()) {
        return Err(SmartError::StateMismatch);
    }
    if let Some(error) = &callback.error {
        let reason = match &callback.error_description {
            Some(desc) => format!("{error}: {desc}"),
            None => error.clone(),
        };
        return Err(SmartError::AuthorizationDenied(reason));
    }
    callback.code.as_deref().ok_or(SmartError::MissingCode)
}

/// Join a FHIR base URL and a relative path with exactly one slash.
#[must_use]
pub fn resource_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Build the authorization redirect URL.
///
/// # Errors
///
/// Returns [`SmartError::InvalidUrl`] if the endpoint is not an absolute URL.
pub fn build_authorize_url(
    endpoints: &OAuthEndpoints,
    params: &AuthorizeParams,
    issuer: &str,
    state: &str,
) -> Result<String, SmartError> {
    let mut url = Url::parse(&endpoints.authorization_endpoint)?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &params.client_id)
        .append_pair("scope", &params.scope)
        .append_pair("redirect_uri", &params.redirect_uri)
        .append_pair("aud", issuer)
        .append_pair("state", state);
    Ok(url.to_string())
}

#[derive(Deserialize)]
struct SmartConfigurationDoc {
    authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
}

/// Parse a `.well-known/smart-configuration` document.
///
/// # Errors
///
/// Returns [`SmartError::Discovery`] if the body is not JSON or lacks either
/// endpoint.
pub fn parse_smart_configuration(body: &str) -> Result<OAuthEndpoints, SmartError> {
    let doc: SmartConfigurationDoc =
        serde_json::from_str(body).map_err(|e| SmartError::Discovery(format!("smart-configuration: {e}")))?;
    match (doc.authorization_endpoint, doc.token_endpoint) {
        (Some(authorization_endpoint), Some(token_endpoint)) => {
            Ok(OAuthEndpoints { authorization_endpoint, token_endpoint })
        }
        _ => Err(SmartError::Discovery("smart-configuration lacks OAuth endpoints".into())),
    }
}

/// Read the `oauth-uris` security extension out of a CapabilityStatement.
///
/// # Errors
///
/// Returns [`SmartError::Discovery`] if the extension or either URI is absent.
pub fn parse_capability_oauth_uris(capability: &Value) -> Result<OAuthEndpoints, SmartError> {
    let oauth = capability
        .get("rest")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|rest| rest.pointer("/security/extension").and_then(Value::as_array))
        .flatten()
        .find(|ext| ext.get("url").and_then(Value::as_str) == Some(OAUTH_URIS_EXTENSION))
        .ok_or_else(|| SmartError::Discovery("CapabilityStatement lacks oauth-uris extension".into()))?;

    let uri = |name: &str| {
        oauth
            .get("extension")
            .and_then(Value::as_array)?
            .iter()
            .find(|e| e.get("url").and_then(Value::as_str) == Some(name))
            .and_then(|e| e.get("valueUri"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    };

    match (uri("authorize"), uri("token")) {
        (Some(authorization_endpoint), Some(token_endpoint)) => {
            Ok(OAuthEndpoints { authorization_endpoint, token_endpoint })
        }
        _ => Err(SmartError::Discovery("oauth-uris extension lacks authorize/token".into())),
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    scope: Option<String>,
    patient: Option<String>,
    expires_in: Option<u64>,
}

/// Parse a token endpoint response into an access marker for `server_url`.
///
/// # Errors
///
/// Returns [`SmartError::TokenExchange`] if the body lacks `access_token`.
pub fn parse_token_response(body: &str, server_url: &str) -> Result<AccessMarker, SmartError> {
    let token: TokenResponse =
        serde_json::from_str(body).map_err(|_| SmartError::TokenExchange(format!("unexpected response: {body}")))?;
    Ok(AccessMarker {
        server_url: server_url.to_owned(),
        access_token: token.access_token,
        token_type: token.token_type.unwrap_or_else(|| "Bearer".to_owned()),
        scope: token.scope,
        patient: token.patient,
        expires_in: token.expires_in,
    })
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// `SmartClient` over `reqwest`.
pub struct HttpSmartClient {
    http: reqwest::Client,
}

impl HttpSmartClient {
    /// # Errors
    ///
    /// Returns [`SmartError::HttpClientBuild`] if the HTTP client fails to build.
    pub fn new(timeouts: UpstreamTimeouts) -> Result<Self, SmartError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| SmartError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http })
    }

    async fn get_text(&self, url: &str, accept: &str) -> Result<String, SmartError> {
        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| SmartError::Request(e.to_string()))?;
        read_success_body(response).await
    }

    /// Discover OAuth endpoints, preferring the SMART configuration document
    /// and falling back to the CapabilityStatement.
    async fn discover(&self, issuer: &str) -> Result<OAuthEndpoints, SmartError> {
        let smart_config = self
            .get_text(&resource_url(issuer, SMART_CONFIGURATION_PATH), "application/json")
            .await
            .and_then(|body| parse_smart_configuration(&body));
        match smart_config {
            Ok(endpoints) => Ok(endpoints),
            Err(e) => {
                debug!(error = %e, issuer, "smart-configuration unavailable, trying metadata");
                let body = self
                    .get_text(&resource_url(issuer, METADATA_PATH), FHIR_JSON)
                    .await
                    .map_err(|e| SmartError::Discovery(e.to_string()))?;
                let capability: Value =
                    serde_json::from_str(&body).map_err(|e| SmartError::Discovery(format!("metadata: {e}")))?;
                parse_capability_oauth_uris(&capability)
            }
        }
    }
}

async fn read_success_body(response: reqwest::Response) -> Result<String, SmartError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| SmartError::Request(e.to_string()))?;
    if !status.is_success() {
        return Err(SmartError::Upstream { status: status.as_u16(), body });
    }
    Ok(body)
}

#[async_trait::async_trait]
impl SmartClient for HttpSmartClient {
    async fn authorize(&self, params: &AuthorizeParams) -> Result<Authorization, SmartError> {
        let issuer = params.issuer.as_deref().ok_or(SmartError::MissingIssuer)?;
        let endpoints = self.discover(issuer).await?;
        let state = generate_token();
        let redirect_url = build_authorize_url(&endpoints, params, issuer, &state)?;
        Ok(Authorization {
            redirect_url,
            pending: PendingAuthorization {
                state,
                issuer: issuer.to_owned(),
                token_endpoint: endpoints.token_endpoint,
                redirect_uri: params.redirect_uri.clone(),
                client_id: params.client_id.clone(),
            },
        })
    }

    async fn complete(
        &self,
        pending: &PendingAuthorization,
        callback: &CallbackParams,
    ) -> Result<AccessMarker, SmartError> {
        let code = validate_callback(pending, callback)?;
        let response = self
            .http
            .post(&pending.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", pending.redirect_uri.as_str()),
                ("client_id", pending.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SmartError::TokenExchange(e.to_string()))?;

        let body = match read_success_body(response).await {
            Ok(body) => body,
            Err(SmartError::Upstream { status, body }) => {
                return Err(SmartError::TokenExchange(format!("{status}: {body}")));
            }
            Err(e) => return Err(SmartError::TokenExchange(e.to_string())),
        };
        parse_token_response(&body, &pending.issuer)
    }

    async fn request(&self, marker: &AccessMarker, path: &str) -> Result<Value, SmartError> {
        let response = self
            .http
            .get(resource_url(&marker.server_url, path))
            .header(reqwest::header::ACCEPT, FHIR_JSON)
            .bearer_auth(&marker.access_token)
            .send()
            .await
            .map_err(|e| SmartError::Request(e.to_string()))?;
        let body = read_success_body(response).await?;
        serde_json::from_str(&body).map_err(|e| SmartError::Parse(e.to_string()))
    }
}

// =============================================================================
// TEST SUPPORT
// =============================================================================


#[cfg(test)]
#[path = "smart_test.rs"]
mod tests;
