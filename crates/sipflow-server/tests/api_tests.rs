//! HTTP API integration tests
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`;
//! no socket is bound.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use sipflow_server::api::{create_router, AppState};
use sipflow_server::auth::{self, AbacConfig, JwtTokenVerifier, NoopTokenVerifier};
use sipflow_server::config::CorsConfig;
use sipflow_server::middleware::{Authenticator, TICKET_COOKIE};
use sipflow_server::models::{FailedAs, SipStatus};

mod common;
use common::{expected_uuids, TestEnv, SOURCE_ID};

const BOUNDARY: &str = "X-SIPFLOW-BOUNDARY";
const SECRET: &[u8] = b"api-test-secret";

fn cors() -> CorsConfig {
    CorsConfig {
        allowed_origins: vec!["http://localhost:3000".into()],
        allow_credentials: false,
    }
}

fn router(env: &TestEnv, authenticator: Authenticator) -> Router {
    let state = AppState {
        ingest: env.ingest.clone(),
        authenticator,
        pool: env.pool.clone(),
        shutdown: CancellationToken::new(),
    };
    create_router(state, &cors())
}

fn open_router(env: &TestEnv) -> Router {
    router(env, Authenticator::disabled())
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart(parts: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (file_name, content) in parts {
        body.push_str(&format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             {content}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body
}

fn token(claims: Value) -> String {
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

fn exp() -> i64 {
    Utc::now().timestamp() + 3600
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let env = TestEnv::start().await;
    let app = open_router(&env);

    let response = send(&app, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

// ============================================================================
// SIPs
// ============================================================================

#[tokio::test]
async fn test_submit_and_list() {
    let env = TestEnv::start().await;
    let app = open_router(&env);

    let response = send(
        &app,
        post_json("/ingest/sips", json!({"source_id": SOURCE_ID, "key": "sip.zip"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["uuid"], json!(expected_uuids(1)[0]));

    let response = send(&app, get("/ingest/sips?limit=5&sort=-created_at")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["meta"], json!({"limit": 5, "offset": 0, "total": 1}));
    assert_eq!(body["data"][0]["name"], "sip.zip");
    assert_eq!(body["data"][0]["status"], "queued");
}

#[tokio::test]
async fn test_upload_keeps_first_part_only() {
    let env = TestEnv::start().await;
    let app = open_router(&env);

    let request = Request::post("/ingest/sips/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart(&[
            ("first.txt", "first part"),
            ("second.txt", "second part"),
        ])))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    assert_eq!(env.upload_bucket.keys(), ["first.txt"]);
    let started = env.engine.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].input["key"], "first.txt");
    assert_eq!(started[0].input["sipSourceId"], Value::Null);
}

#[tokio::test]
async fn test_upload_rejects_non_multipart() {
    let env = TestEnv::start().await;
    let app = open_router(&env);

    let request = Request::post("/ingest/sips/upload")
        .header(header::CONTENT_TYPE, "application/zip")
        .body(Body::from("PK"))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(json_body(response).await["name"], "invalid-media-type");
    assert!(env.upload_bucket.keys().is_empty());
}

#[tokio::test]
async fn test_upload_over_size_limit() {
    let env = TestEnv::builder().upload_max_size(16).start().await;
    let app = open_router(&env);

    let request = Request::post("/ingest/sips/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart(&[("big.zip", &"x".repeat(1024))])))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["name"], "invalid-multipart-request");
    assert!(env.engine.started().is_empty());
}

#[tokio::test]
async fn test_show_sip_error_bodies() {
    let env = TestEnv::start().await;
    let app = open_router(&env);

    let response = send(&app, get("/ingest/sips/nope")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({"name": "not-valid", "message": "invalid UUID"})
    );

    let missing = uuid::Uuid::new_v4();
    let response = send(&app, get(&format!("/ingest/sips/{missing}"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(response).await,
        json!({"name": "sip-not-found", "message": "SIP not found"})
    );
}

#[tokio::test]
async fn test_review_endpoints() {
    let env = TestEnv::start().await;
    let app = open_router(&env);
    let sip = env.insert_sip("sip.zip", SipStatus::Pending).await;

    let uri = format!("/ingest/sips/{}/reject", sip.uuid);
    let response = send(&app, Request::post(&uri).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["name"], "not-available");

    env.insert_workflow(&sip, "processing-workflow-1").await;
    let location_id = uuid::Uuid::new_v4();
    let response = send(
        &app,
        post_json(
            &format!("/ingest/sips/{}/confirm", sip.uuid),
            json!({"location_id": location_id}),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(env.engine.signals().len(), 1);

    let response = send(
        &app,
        get(&format!("/ingest/sips/{}/workflows", sip.uuid)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_download_with_ticket_cookie() {
    let env = TestEnv::builder().with_tickets().start().await;
    let app = open_router(&env);
    let sip = env.insert_sip("sip.zip", SipStatus::Processing).await;
    env.internal_bucket.put("failed/sip.zip", "bytes", Utc::now());
    env.ingest
        .set_sip_failed(sip.uuid, FailedAs::Sip, "failed/sip.zip".into())
        .await
        .unwrap();

    let uri = format!("/ingest/sips/{}/download", sip.uuid);
    let response = send(&app, Request::post(&uri).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("ticket cookie set");
    let ticket = json_body(response).await["data"]["ticket"]
        .as_str()
        .map(str::to_string)
        .expect("ticket in body");
    assert!(cookie.starts_with(&format!("{TICKET_COOKIE}={ticket};")));

    let download = || {
        Request::get(&uri)
            .header(header::COOKIE, format!("{TICKET_COOKIE}={ticket}"))
            .body(Body::empty())
            .unwrap()
    };

    let response = send(&app, download()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"failed/sip.zip\""
    );
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"bytes");

    let response = send(&app, download()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Other features
// ============================================================================

#[tokio::test]
async fn test_sip_source_objects() {
    let env = TestEnv::start().await;
    let app = open_router(&env);
    env.source_bucket.put("sip.zip", "zip", Utc::now());

    let response = send(&app, get(&format!("/ingest/sip-sources/{SOURCE_ID}/objects"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["objects"][0]["key"], "sip.zip");

    let other = uuid::Uuid::new_v4();
    let response = send(&app, get(&format!("/ingest/sip-sources/{other}/objects"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batches_not_implemented() {
    let env = TestEnv::start().await;
    let app = open_router(&env);

    let response = send(&app, get("/ingest/batches")).await;
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(json_body(response).await["name"], "not-implemented");
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_bearer_token() {
    let env = TestEnv::start().await;
    let app = router(&env, Authenticator::new(Arc::new(NoopTokenVerifier)));

    let response = send(&app, get("/ingest/sips")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        json_body(response).await,
        json!({"name": "unauthorized", "message": "Unauthorized"})
    );

    let response = send(&app, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bearer_token_attributes() {
    let env = TestEnv::start().await;
    let abac = AbacConfig {
        enabled: true,
        claim_path: "attributes".into(),
        ..Default::default()
    };
    let verifier = JwtTokenVerifier::hs256(SECRET, Some("https://idp"), None, abac);
    let app = router(&env, Authenticator::new(Arc::new(verifier)));

    let reader = token(json!({
        "iss": "https://idp", "sub": "u1", "exp": exp(),
        "attributes": [auth::SIPS_LIST],
    }));
    let request = Request::get("/ingest/sips")
        .header(header::AUTHORIZATION, format!("Bearer {reader}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::OK);

    let request = Request::get("/ingest/users")
        .header(header::AUTHORIZATION, format!("Bearer {reader}"))
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["name"], "forbidden");

    let request = Request::get("/ingest/sips")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::UNAUTHORIZED);
}
