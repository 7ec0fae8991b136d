use super::test_support::*;
use super::*;
use std::collections::HashMap;
use std::net::Ipv4Addr;

use axum::extract::{Form, Path};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;

const GOOD_CODE: &str = "good-code";
const UPSTREAM_TOKEN: &str = "tok-1";

fn params(issuer: Option<&str>) -> AuthorizeParams {
    AuthorizeParams {
        issuer: issuer.map(str::to_owned),
        redirect_uri: "http://localhost:5000/fhir/callback".into(),
        client_id: "patient-portal".into(),
        scope: "openid patient/*.read".into(),
    }
}

fn timeouts() -> UpstreamTimeouts {
    UpstreamTimeouts { request_secs: 5, connect_secs: 2 }
}

// =============================================================================
// Fake FHIR + authorization server
// =============================================================================

struct Upstream {
    base: String,
    issuer: String,
}

async fn token(Form(form): Form<HashMap<String, String>>) -> Response {
    let grant_ok = form.get("grant_type").map(String::as_str) == Some("authorization_code");
    let code_ok = form.get("code").map(String::as_str) == Some(GOOD_CODE);
    let client_ok = form.get("client_id").map(String::as_str) == Some("patient-portal");
    if grant_ok && code_ok && client_ok {
        Json(json!({
            "access_token": UPSTREAM_TOKEN,
            "token_type": "bearer",
            "scope": "patient/*.read",
            "patient": "42",
            "expires_in": 3600
        }))
        .into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response()
    }
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {UPSTREAM_TOKEN}").as_str())
}

async fn patients(headers: HeaderMap) -> Response {
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"resourceType": "Bundle", "type": "searchset", "entry": []})).into_response()
}

async fn patient(Path(id): Path<String>, headers: HeaderMap) -> Response {
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if id != "42" {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({"resourceType": "Patient", "id": "42"})).into_response()
}

async fn spawn_upstream(with_smart_configuration: bool) -> Upstream {
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("local addr"));
    let issuer = format!("{base}/fhir");

    let smart_configuration = json!({
        "authorization_endpoint": format!("{base}/auth/authorize"),
        "token_endpoint": format!("{base}/auth/token"),
    });
    let capability = json!({
        "resourceType": "CapabilityStatement",
        "rest": [{
            "mode": "server",
            "security": {"extension": [{
                "url": OAUTH_URIS_EXTENSION,
                "extension": [
                    {"url": "authorize", "valueUri": format!("{base}/auth/authorize-legacy")},
                    {"url": "token", "valueUri": format!("{base}/auth/token")}
                ]
            }]}
        }]
    });

    let mut router = Router::new()
        .route(
            "/fhir/metadata",
            get(move || {
                let body = capability.clone();
                async move { Json(body) }
            }),
        )
        .route("/auth/token", post(token))
        .route("/fhir/Patient", get(patients))
        .route("/fhir/Patient/{id}", get(patient));
    if with_smart_configuration {
        router = router.route(
            "/fhir/.well-known/smart-configuration",
            get(move || {
                let body = smart_configuration.clone();
                async move { Json(body) }
            }),
        );
    }

    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Upstream { base, issuer }
}

fn query_map(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .expect("absolute url")
        .query_pairs()
        .into_owned()
        .collect()
}

// =============================================================================
// pure helpers
// =============================================================================

#[test]
fn resource_url_joins_with_single_slash() {
    assert_eq!(resource_url("https://f.test/r4/", "/Patient"), "https://f.test/r4/Patient");
    assert_eq!(resource_url("https://f.test/r4", "Patient/42"), "https://f.test/r4/Patient/42");
}

#[test]
fn authorize_url_carries_encoded_parameters() {
    let endpoints = OAuthEndpoints {
        authorization_endpoint: "https://auth.test/authorize?tenant=a".into(),
        token_endpoint: "https://auth.test/token".into(),
    };
    let url = build_authorize_url(&endpoints, &params(Some(TEST_ISSUER)), TEST_ISSUER, "st-1").unwrap();
    assert!(url.starts_with("https://auth.test/authorize?"));
    let query = query_map(&url);
    assert_eq!(query["tenant"], "a");
    assert_eq!(query["response_type"], "code");
    assert_eq!(query["client_id"], "patient-portal");
    assert_eq!(query["scope"], "openid patient/*.read");
    assert_eq!(query["redirect_uri"], "http://localhost:5000/fhir/callback");
    assert_eq!(query["aud"], TEST_ISSUER);
    assert_eq!(query["state"], "st-1");
}

#[test]
fn authorize_url_rejects_relative_endpoint() {
    let endpoints = OAuthEndpoints { authorization_endpoint: "/authorize".into(), token_endpoint: "/token".into() };
    let err = build_authorize_url(&endpoints, &params(Some(TEST_ISSUER)), TEST_ISSUER, "s").unwrap_err();
    assert!(matches!(err, SmartError::InvalidUrl(_)));
}

#[test]
fn validate_callback_returns_code_on_matching_state() {
    let pending = sample_pending("st-1");
    let cb = callback("c-1", "st-1");
    assert_eq!(validate_callback(&pending, &cb).unwrap(), "c-1");
}

#[test]
fn validate_callback_rejects_mismatched_or_missing_state() {
    let pending = sample_pending("st-1");
    let wrong = callback("c-1", "st-2");
    assert!(matches!(validate_callback(&pending, &wrong), Err(SmartError::StateMismatch)));
    let missing = CallbackParams { code: Some("c-1".into()), ..CallbackParams::default() };
    assert!(matches!(validate_callback(&pending, &missing), Err(SmartError::StateMismatch)));
}

#[test]
fn validate_callback_surfaces_denial() {
    let pending = sample_pending("st-1");
    let denied = CallbackParams {
        state: Some("st-1".into()),
        error: Some("access_denied".into()),
        error_description: Some("user said no".into()),
        ..CallbackParams::default()
    };
    let err = validate_callback(&pending, &denied).unwrap_err();
    assert_eq!(err.to_string(), "authorization denied: access_denied: user said no");
}

#[test]
fn validate_callback_requires_code() {
    let pending = sample_pending("st-1");
    let no_code = CallbackParams { state: Some("st-1".into()), ..CallbackParams::default() };
    assert!(matches!(validate_callback(&pending, &no_code), Err(SmartError::MissingCode)));
}

#[test]
fn callback_detection() {
    assert!(!CallbackParams::default().is_callback());
    assert!(callback("c", "s").is_callback());
    assert!(CallbackParams { error: Some("x".into()), ..CallbackParams::default() }.is_callback());
}

#[test]
fn smart_configuration_parses_endpoints() {
    let body = r#"{"authorization_endpoint":"https://a/authorize","token_endpoint":"https://a/token","capabilities":[]}"#;
    let endpoints = parse_smart_configuration(body).unwrap();
    assert_eq!(endpoints.authorization_endpoint, "https://a/authorize");
    assert_eq!(endpoints.token_endpoint, "https://a/token");
}

#[test]
fn smart_configuration_without_endpoints_errors() {
    assert!(matches!(parse_smart_configuration(r#"{"token_endpoint":"x"}"#), Err(SmartError::Discovery(_))));
    assert!(matches!(parse_smart_configuration("<html>"), Err(SmartError::Discovery(_))));
}

#[test]
fn capability_oauth_uris_parse() {
    let capability = json!({"rest": [{"security": {"extension": [{
        "url": OAUTH_URIS_EXTENSION,
        "extension": [{"url": "authorize", "valueUri": "https://a/auth"}, {"url": "token", "valueUri": "https://a/tok"}]
    }]}}]});
    let endpoints = parse_capability_oauth_uris(&capability).unwrap();
    assert_eq!(endpoints.authorization_endpoint, "https://a/auth");
    assert_eq!(endpoints.token_endpoint, "https://a/tok");
}

#[test]
fn capability_without_extension_errors() {
    let capability = json!({"rest": [{"mode": "server"}]});
    assert!(matches!(parse_capability_oauth_uris(&capability), Err(SmartError::Discovery(_))));
    assert!(matches!(parse_capability_oauth_uris(&json!({})), Err(SmartError::Discovery(_))));
}

#[test]
fn token_response_defaults_token_type() {
    let marker = parse_token_response(r#"{"access_token":"t"}"#, TEST_ISSUER).unwrap();
    assert_eq!(marker.access_token, "t");
    assert_eq!(marker.token_type, "Bearer");
    assert_eq!(marker.server_url, TEST_ISSUER);
    assert_eq!(marker.patient, None);
}

#[test]
fn token_response_without_access_token_errors() {
    let err = parse_token_response(r#"{"error":"invalid_grant"}"#, TEST_ISSUER).unwrap_err();
    assert!(matches!(err, SmartError::TokenExchange(_)));
}

// =============================================================================
// HttpSmartClient against a live fake upstream
// =============================================================================

#[tokio::test]
async fn authorize_uses_smart_configuration() {
    let upstream = spawn_upstream(true).await;
    let client = HttpSmartClient::new(timeouts()).unwrap();

    let auth = client.authorize(&params(Some(&upstream.issuer))).await.unwrap();
    assert!(auth.redirect_url.starts_with(&format!("{}/auth/authorize?", upstream.base)));
    let query = query_map(&auth.redirect_url);
    assert_eq!(query["state"], auth.pending.state);
    assert_eq!(query["aud"], upstream.issuer);
    assert_eq!(auth.pending.issuer, upstream.issuer);
    assert_eq!(auth.pending.token_endpoint, format!("{}/auth/token", upstream.base));
    assert_eq!(auth.pending.state.len(), 64);
}

#[tokio::test]
async fn authorize_falls_back_to_capability_statement() {
    let upstream = spawn_upstream(false).await;
    let client = HttpSmartClient::new(timeouts()).unwrap();

    let auth = client.authorize(&params(Some(&upstream.issuer))).await.unwrap();
    assert!(auth.redirect_url.starts_with(&format!("{}/auth/authorize-legacy?", upstream.base)));
}

#[tokio::test]
async fn authorize_without_issuer_errors() {
    let client = HttpSmartClient::new(timeouts()).unwrap();
    let err = client.authorize(&params(None)).await.unwrap_err();
    assert!(matches!(err, SmartError::MissingIssuer));
}

#[tokio::test]
async fn authorize_against_server_without_discovery_errors() {
    let upstream = spawn_upstream(true).await;
    let client = HttpSmartClient::new(timeouts()).unwrap();
    let issuer = format!("{}/elsewhere", upstream.base);
    let err = client.authorize(&params(Some(&issuer))).await.unwrap_err();
    assert!(matches!(err, SmartError::Discovery(_)));
}

#[tokio::test]
async fn complete_exchanges_code_for_marker() {
    let upstream = spawn_upstream(true).await;
    let client = HttpSmartClient::new(timeouts()).unwrap();
    let auth = client.authorize(&params(Some(&upstream.issuer))).await.unwrap();

    let marker = client
        .complete(&auth.pending, &callback(GOOD_CODE, &auth.pending.state))
        .await
        .unwrap();
    assert_eq!(marker.access_token, UPSTREAM_TOKEN);
    assert_eq!(marker.token_type, "bearer");
    assert_eq!(marker.server_url, upstream.issuer);
    assert_eq!(marker.patient.as_deref(), Some("42"));
    assert_eq!(marker.expires_in, Some(3600));
}

#[tokio::test]
async fn complete_with_rejected_code_is_token_exchange_error() {
    let upstream = spawn_upstream(true).await;
    let client = HttpSmartClient::new(timeouts()).unwrap();
    let auth = client.authorize(&params(Some(&upstream.issuer))).await.unwrap();

    let err = client
        .complete(&auth.pending, &callback("bad-code", &auth.pending.state))
        .await
        .unwrap_err();
    assert!(matches!(err, SmartError::TokenExchange(ref msg) if msg.starts_with("400")));
}

#[tokio::test]
async fn complete_with_wrong_state_never_calls_token_endpoint() {
    let client = HttpSmartClient::new(timeouts()).unwrap();
    // fhir.test does not resolve, so reaching the token endpoint would fail differently.
    let pending = sample_pending("expected");
    let err = client
        .complete(&pending, &callback(GOOD_CODE, "forged"))
        .await
        .unwrap_err();
    assert!(matches!(err, SmartError::StateMismatch));
}

#[tokio::test]
async fn request_reads_resources_with_bearer_token() {
    let upstream = spawn_upstream(true).await;
    let client = HttpSmartClient::new(timeouts()).unwrap();
    let marker = AccessMarker { server_url: upstream.issuer.clone(), access_token: UPSTREAM_TOKEN.into(), ..sample_marker() };

    let bundle = client.request(&marker, "Patient").await.unwrap();
    assert_eq!(bundle["resourceType"], "Bundle");
    let patient = client.request(&marker, "Patient/42").await.unwrap();
    assert_eq!(patient, json!({"resourceType": "Patient", "id": "42"}));
}

#[tokio::test]
async fn request_surfaces_upstream_status() {
    let upstream = spawn_upstream(true).await;
    let client = HttpSmartClient::new(timeouts()).unwrap();

    let stale = AccessMarker { server_url: upstream.issuer.clone(), access_token: "revoked".into(), ..sample_marker() };
    let err = client.request(&stale, "Patient").await.unwrap_err();
    assert!(matches!(err, SmartError::Upstream { status: 401, .. }));

    let marker = AccessMarker { server_url: upstream.issuer.clone(), access_token: UPSTREAM_TOKEN.into(), ..sample_marker() };
    let err = client.request(&marker, "Patient/7").await.unwrap_err();
    assert!(matches!(err, SmartError::Upstream { status: 404, .. }));
}
