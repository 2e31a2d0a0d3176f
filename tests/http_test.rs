// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP-level tests: routing, envelope, cookies and headers.

mod harness;

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use harness::fixtures::{spawn_app, test_config, TestApp, ORIGIN, USER_AGENT};
use serde_json::{json, Value};
use tower::ServiceExt;

fn http_app() -> TestApp {
    let mut config = test_config();
    config.trust_forwarded_for = true;
    spawn_app(config)
}

fn request(method: Method, uri: &str, ip: &str, body: Option<Value>) -> axum::http::request::Builder {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", ip)
        .header(header::USER_AGENT, USER_AGENT)
        .header(header::ORIGIN, ORIGIN);
    match body {
        Some(_) => builder.header(header::CONTENT_TYPE, "application/json"),
        None => builder,
    }
}

async fn send(app: &Router, builder: axum::http::request::Builder, body: Option<Value>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, bytes.to_vec())
}

async fn call(app: &Router, method: Method, uri: &str, ip: &str, body: Option<Value>) -> (StatusCode, HeaderMap, Value) {
    let builder = request(method, uri, ip, body.clone());
    let (status, headers, bytes) = send(app, builder, body).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, json)
}

fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

fn cookie_pair(headers: &HeaderMap, name: &str) -> String {
    set_cookies(headers)
        .into_iter()
        .find(|c| c.starts_with(&format!("{}=", name)))
        .and_then(|c| c.split(';').next().map(str::to_string))
        .expect("cookie present")
}

#[tokio::test]
async fn test_health_carries_security_headers() {
    let app = http_app().router();
    let (status, headers, body) = call(&app, Method::GET, "/health", "10.1.0.1", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
    assert_eq!(
        headers["permissions-policy"],
        "camera=(), microphone=(), geolocation=(), payment=()"
    );
    assert_eq!(headers["cache-control"], "no-store");
}

#[tokio::test]
async fn test_validate_sets_cookies() {
    let app = http_app().router();
    let (status, headers, body) = call(
        &app,
        Method::POST,
        "/rsvp/validate",
        "10.1.0.2",
        Some(json!({"inviteCode": "wed123"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["guest"]["firstName"], "Ada");
    assert_eq!(body["data"]["guest"]["plusOneAllowed"], true);
    assert!(body["data"]["guest"].get("email").is_none());

    let cookies = set_cookies(&headers);
    let session = cookies
        .iter()
        .find(|c| c.starts_with("rsvp_session="))
        .unwrap();
    assert!(session.contains("HttpOnly"));
    assert!(session.contains("SameSite=Strict"));
    assert!(session.contains("Max-Age=7200"));
    assert!(session.contains("Path=/rsvp"));
    assert!(session.contains(body["data"]["sessionId"].as_str().unwrap()));

    let fingerprint = cookies.iter().find(|c| c.starts_with("rsvp_fp=")).unwrap();
    assert!(fingerprint.contains("Max-Age=86400"));
}

#[tokio::test]
async fn test_invalid_code_errors_are_byte_identical() {
    let test_app = http_app();
    let app = test_app.router();

    let unknown_body = Some(json!({"inviteCode": "ABCDEF"}));
    let (unknown_status, _, unknown) = send(
        &app,
        request(Method::POST, "/rsvp/validate", "10.1.0.3", unknown_body.clone()),
        unknown_body,
    )
    .await;
    let lookups = test_app.repo.lookup_count();
    assert_eq!(lookups, 1);

    let malformed_body = Some(json!({"inviteCode": "ab"}));
    let (malformed_status, _, malformed) = send(
        &app,
        request(Method::POST, "/rsvp/validate", "10.1.0.4", malformed_body.clone()),
        malformed_body,
    )
    .await;

    assert_eq!(unknown_status, StatusCode::BAD_REQUEST);
    assert_eq!(unknown_status, malformed_status);
    assert_eq!(unknown, malformed);
    assert_eq!(test_app.repo.lookup_count(), lookups);

    let body: Value = serde_json::from_slice(&unknown).unwrap();
    assert_eq!(
        body,
        json!({"success": false, "error": {"message": "Invalid invite code", "code": "INVALID_CODE"}})
    );
}

#[tokio::test]
async fn test_foreign_origin_is_forbidden() {
    let app = http_app().router();
    let body = Some(json!({"inviteCode": "WED123"}));
    let builder = Request::builder()
        .method(Method::POST)
        .uri("/rsvp/validate")
        .header("x-forwarded-for", "10.1.0.5")
        .header(header::ORIGIN, "https://evil.example")
        .header(header::CONTENT_TYPE, "application/json");
    let (status, _, bytes) = send(&app, builder, body).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "INVALID_ORIGIN");
}

#[tokio::test]
async fn test_schema_violations_are_invalid_input() {
    let app = http_app().router();

    let builder = request(Method::POST, "/rsvp/validate", "10.1.0.6", Some(json!({})));
    let response = app
        .clone()
        .oneshot(builder.body(Body::from("{not json")).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, _, body) = call(
        &app,
        Method::POST,
        "/rsvp/validate",
        "10.1.0.6",
        Some(json!({"inviteCode": "WED123", "isAdmin": true})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_rate_limit_sets_retry_after() {
    let app = http_app().router();
    for _ in 0..5 {
        let (status, _, _) = call(
            &app,
            Method::POST,
            "/rsvp/validate",
            "10.1.0.7",
            Some(json!({"inviteCode": "ZZZZZZ"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let (status, headers, body) = call(
        &app,
        Method::POST,
        "/rsvp/validate",
        "10.1.0.7",
        Some(json!({"inviteCode": "WED123"})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers[header::RETRY_AFTER], "7200");
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_cookie_session_round_trip() {
    let app = http_app().router();
    let ip = "10.1.0.8";

    let (_, headers, validated) = call(
        &app,
        Method::POST,
        "/rsvp/validate",
        ip,
        Some(json!({"inviteCode": "WED123"})),
    )
    .await;
    let cookie = cookie_pair(&headers, "rsvp_session");
    let session_id = validated["data"]["sessionId"].as_str().unwrap().to_string();

    // Heartbeat
    let (status, _, beat) = call(&app, Method::GET, &format!("/rsvp/session/{}", session_id), ip, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(beat["data"]["minutesRemaining"], 120);

    // Fetch
    let builder = request(Method::GET, "/rsvp/WED123", ip, None).header(header::COOKIE, &cookie);
    let (status, _, bytes) = send(&app, builder, None).await;
    assert_eq!(status, StatusCode::OK);
    let snapshot: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(snapshot["data"]["guest"]["id"], "g1");
    assert_eq!(snapshot["data"]["mealOptions"].as_array().unwrap().len(), 3);

    // Submit
    let answers = json!({"guestId": "g1", "attending": true, "mealChoice": "chicken", "clientElapsedMs": 12000});
    let builder = request(Method::PUT, "/rsvp/WED123", ip, Some(answers.clone())).header(header::COOKIE, &cookie);
    let (status, headers, bytes) = send(&app, builder, Some(answers.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["message"], "Thank you for your RSVP!");
    assert!(set_cookies(&headers)
        .iter()
        .all(|c| c.contains("Max-Age=0")));

    // Spent
    let builder = request(Method::PUT, "/rsvp/WED123", ip, Some(answers.clone())).header(header::COOKIE, &cookie);
    let (status, _, bytes) = send(&app, builder, Some(answers)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "INVALID_SESSION");
}

#[tokio::test]
async fn test_missing_session_cookie_is_not_found() {
    let app = http_app().router();
    let (status, _, body) = call(&app, Method::GET, "/rsvp/WED123", "10.1.0.9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_honeypot_response_matches_genuine_success() {
    let test_app = http_app();
    let app = test_app.router();

    // Genuine
    let (_, headers, _) = call(
        &app,
        Method::POST,
        "/rsvp/validate",
        "10.1.0.10",
        Some(json!({"inviteCode": "WED456"})),
    )
    .await;
    let cookie = cookie_pair(&headers, "rsvp_session");
    let answers = json!({"guestId": "g2", "attending": true, "clientElapsedMs": 9000});
    let builder = request(Method::PUT, "/rsvp/WED456", "10.1.0.10", Some(answers.clone())).header(header::COOKIE, &cookie);
    let (genuine_status, genuine_headers, genuine) = send(&app, builder, Some(answers)).await;

    // Bot, no session at all
    let trap = json!({"guestId": "g2", "attending": true, "website": "http://spam.example", "clientElapsedMs": 9000});
    let builder = request(Method::PUT, "/rsvp/WED456", "10.1.0.11", Some(trap.clone()));
    let (bot_status, bot_headers, bot) = send(&app, builder, Some(trap)).await;

    assert_eq!(genuine_status, StatusCode::OK);
    assert_eq!(bot_status, genuine_status);
    assert_eq!(bot, genuine);
    assert_eq!(set_cookies(&bot_headers), set_cookies(&genuine_headers));
    assert_eq!(test_app.repo.submissions().await.len(), 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = http_app().router();
    call(
        &app,
        Method::POST,
        "/rsvp/validate",
        "10.1.0.12",
        Some(json!({"inviteCode": "WED123"})),
    )
    .await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains(r#"rsvp_requests_total{operation="validate",outcome="ok"} 1"#));
}

#[tokio::test]
async fn test_submit_rejects_fields_outside_schema() {
    let test_app = http_app();
    let app = test_app.router();
    let (status, _, body) = call(
        &app,
        Method::PUT,
        "/rsvp/WED123",
        "10.1.0.13",
        Some(json!({"guestId": "g1", "attending": true, "clientElapsedMs": 9000, "role": "admin"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
    assert!(test_app.repo.submissions().await.is_empty());
}
