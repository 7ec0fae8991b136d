use super::*;
use std::net::Ipv4Addr;

use axum::Router;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};

// =============================================================
// ApiResponse
// =============================================================

#[test]
fn success_covers_2xx_only() {
    assert!(ApiResponse::new(200, "").is_success());
    assert!(ApiResponse::new(204, "").is_success());
    assert!(!ApiResponse::new(302, "").is_success());
    assert!(!ApiResponse::new(500, "").is_success());
}

#[test]
fn auth_failure_is_401_or_403() {
    assert!(ApiResponse::new(401, "").is_auth_failure());
    assert!(ApiResponse::new(403, "").is_auth_failure());
    assert!(!ApiResponse::new(500, "").is_auth_failure());
}

#[test]
fn json_decodes_body() {
    let value: Value = ApiResponse::new(200, r#"{"authenticated":true}"#).json().unwrap();
    assert_eq!(value, json!({"authenticated": true}));
}

#[test]
fn json_reports_decode_error() {
    let err = ApiResponse::new(200, "<html>").json::<Value>().unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

// =============================================================
// Endpoint URLs
// =============================================================

#[test]
fn endpoints_join_onto_base() {
    let api = HttpGateway::new("http://localhost:5000/").unwrap();
    assert_eq!(api.start_url(), "http://localhost:5000/fhir/start");
    assert_eq!(api.endpoint(STOP_PATH).as_str(), "http://localhost:5000/fhir/stop");
}

#[test]
fn endpoints_keep_base_path_prefix() {
    let api = HttpGateway::new("https://portal.test/api").unwrap();
    assert_eq!(api.endpoint(CHECK_SESSION_PATH).as_str(), "https://portal.test/api/fhir/check-session");
}

#[test]
fn patient_id_is_one_encoded_segment() {
    let api = HttpGateway::new("http://localhost:5000").unwrap();
    assert_eq!(api.patient_endpoint("42").as_str(), "http://localhost:5000/fhir/patients/42");
    assert_eq!(api.patient_endpoint("a b").as_str(), "http://localhost:5000/fhir/patients/a%20b");
    assert_eq!(api.patient_endpoint("a/b").as_str(), "http://localhost:5000/fhir/patients/a%2Fb");
}

#[test]
fn base_url_must_be_http() {
    assert!(matches!(HttpGateway::new("not a url"), Err(ApiError::InvalidBaseUrl { .. })));
    assert!(matches!(HttpGateway::new("ftp://host"), Err(ApiError::InvalidBaseUrl { .. })));
}

// =============================================================
// Against a fake gateway
// =============================================================

fn has_session(headers: &HeaderMap) -> bool {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|c| c.contains("portal.sid=abc"))
}

async fn fake_check(headers: HeaderMap) -> Response {
    if has_session(&headers) {
        (StatusCode::OK, Json(json!({"authenticated": true}))).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"authenticated": false}))).into_response()
    }
}

async fn fake_patients() -> Response {
    (
        [(header::SET_COOKIE, "portal.sid=abc; Path=/; HttpOnly")],
        Json(json!({"resourceType": "Bundle", "entry": []})),
    )
        .into_response()
}

async fn fake_patient(Path(id): Path<String>) -> Json<Value> {
    Json(json!({"resourceType": "Patient", "id": id}))
}

async fn fake_stop() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "Failed to stop FHIR client"}))).into_response()
}

async fn spawn_fake_gateway() -> String {
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let router = Router::new()
        .route("/fhir/check-session", get(fake_check))
        .route("/fhir/patients", get(fake_patients))
        .route("/fhir/patients/{id}", get(fake_patient))
        .route("/fhir/stop", post(fake_stop));
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fake gateway serve");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn cookie_from_earlier_response_is_sent_later() {
    let api = HttpGateway::new(&spawn_fake_gateway().await).unwrap();

    assert_eq!(api.check_session().await.unwrap().status, 401);
    assert_eq!(api.fetch_patients().await.unwrap().status, 200);
    let checked = api.check_session().await.unwrap();
    assert_eq!(checked.status, 200);
    assert_eq!(checked.json::<Value>().unwrap(), json!({"authenticated": true}));
}

#[tokio::test]
async fn fetch_patient_round_trips_encoded_id() {
    let api = HttpGateway::new(&spawn_fake_gateway().await).unwrap();
    let response = api.fetch_patient("a b").await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.json::<Value>().unwrap()["id"], "a b");
}

#[tokio::test]
async fn error_status_is_a_response_not_an_error() {
    let api = HttpGateway::new(&spawn_fake_gateway().await).unwrap();
    let response = api.stop().await.unwrap();
    assert_eq!(response.status, 500);
    assert!(!response.is_success());
}

#[tokio::test]
async fn unreachable_gateway_is_transport_error() {
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let api = HttpGateway::new(&format!("http://{addr}")).unwrap();
    assert!(matches!(api.check_session().await, Err(ApiError::Transport(_))));
}
