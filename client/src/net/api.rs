//! Gateway API for the client store.
//!
//! `GatewayApi` is the seam the store calls through; `HttpGateway` is the
//! `reqwest` implementation. Its client keeps a cookie store, so the session
//! cookie set by the gateway rides along on every later call the same way a
//! browser does with `credentials: "include"`.
//!
//! ERROR HANDLING
//! ==============
//! Any HTTP status is a successful call and comes back as an `ApiResponse`;
//! only transport failures are `ApiError`. Interpreting statuses is the
//! store's job.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use serde::de::DeserializeOwned;
use url::Url;

pub const START_PATH: &str = "/fhir/start";
pub const CHECK_SESSION_PATH: &str = "/fhir/check-session";
pub const STOP_PATH: &str = "/fhir/stop";
pub const PATIENTS_PATH: &str = "/fhir/patients";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid gateway base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("gateway request failed: {0}")]
    Transport(String),
    #[error("gateway response decode failed: {0}")]
    Decode(String),
}

/// Status and raw body of a completed gateway call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 401 or 403 from the gateway.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self.status, 401 | 403)
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Decode`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Gateway endpoints used by the store. Enables mocking in tests.
#[async_trait::async_trait]
pub trait GatewayApi: Send + Sync {
    /// Absolute URL of the start endpoint. The browser navigates here.
    fn start_url(&self) -> String;

    /// `GET /fhir/check-session`.
    async fn check_session(&self) -> Result<ApiResponse, ApiError>;

    /// `GET /fhir/patients`.
    async fn fetch_patients(&self) -> Result<ApiResponse, ApiError>;

    /// `GET /fhir/patients/{id}`.
    async fn fetch_patient(&self, id: &str) -> Result<ApiResponse, ApiError>;

    /// `POST /fhir/stop`.
    async fn stop(&self) -> Result<ApiResponse, ApiError>;
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

pub struct HttpGateway {
    base: Url,
    http: reqwest::Client,
}

impl HttpGateway {
    /// Gateway client rooted at `base_url` (e.g. `http://localhost:5000`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an absolute http(s) URL or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let invalid = |reason: String| ApiError::InvalidBaseUrl { url: base_url.to_owned(), reason };
        let base = Url::parse(base_url.trim_end_matches('/')).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", base.scheme())));
        }

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { base, http })
    }

    /// Absolute URL for a gateway path, keeping any path prefix on the base.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        url
    }

    /// Patient instance URL with `id` percent-encoded as one path segment.
    #[must_use]
    pub fn patient_endpoint(&self, id: &str) -> Url {
        let mut url = self.endpoint(PATIENTS_PATH);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(id);
        }
        url
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ApiResponse, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(ApiResponse { status, body })
    }
}

#[async_trait::async_trait]
impl GatewayApi for HttpGateway {
    fn start_url(&self) -> String {
        self.endpoint(START_PATH).into()
    }

    async fn check_session(&self) -> Result<ApiResponse, ApiError> {
        self.send(self.http.get(self.endpoint(CHECK_SESSION_PATH))).await
    }

    async fn fetch_patients(&self) -> Result<ApiResponse, ApiError> {
        self.send(self.http.get(self.endpoint(PATIENTS_PATH))).await
    }

    async fn fetch_patient(&self, id: &str) -> Result<ApiResponse, ApiError> {
        self.send(self.http.get(self.patient_endpoint(id))).await
    }

    async fn stop(&self) -> Result<ApiResponse, ApiError> {
        self.send(self.http.post(self.endpoint(STOP_PATH))).await
    }
}
