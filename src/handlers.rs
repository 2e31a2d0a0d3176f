// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the RSVP guard service.
//!
//! Thin transport layer over [`RsvpFlow`]:
//! - Extracts client IP, headers and the session cookie
//! - Runs each operation to completion in its own task
//! - Wraps results in the `{ success, data, error }` envelope
//! - Sets security headers on every response

use crate::config::Config;
use crate::error::{Result, RsvpError};
use crate::flow::{ClientContext, GuestSnapshot, GuestSummary, RsvpFlow, SubmitRequest, ValidateRequest};
use crate::session::{token_prefix, SessionStatus};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use cookie::{Cookie, SameSite};
use serde::Serialize;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Shown for every accepted submission, genuine or not.
const SUBMIT_MESSAGE: &str = "Thank you for your RSVP!";

/// Cookie scope.
const COOKIE_PATH: &str = "/rsvp";

/// Shared application state.
pub struct AppState {
    pub flow: Arc<RsvpFlow>,
    pub config: Config,
}

impl AppState {
    pub fn new(flow: RsvpFlow) -> Self {
        let config = flow.config().clone();
        Self {
            flow: Arc::new(flow),
            config,
        }
    }
}

/// Uniform response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Error part of the envelope.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub code: &'static str,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Data returned by a successful validation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub guest: GuestSummary,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub message: &'static str,
}

impl IntoResponse for RsvpError {
    fn into_response(self) -> Response {
        let status = match &self {
            RsvpError::InvalidOrigin | RsvpError::GuestMismatch => StatusCode::FORBIDDEN,
            RsvpError::InvalidInput(_) | RsvpError::InvalidCode => StatusCode::BAD_REQUEST,
            RsvpError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RsvpError::SessionExpired | RsvpError::InvalidSession => StatusCode::UNAUTHORIZED,
            RsvpError::SessionNotFound => StatusCode::NOT_FOUND,
            RsvpError::Repository(_) => StatusCode::SERVICE_UNAVAILABLE,
            RsvpError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ApiError {
                message: self.public_message(),
                code: self.code(),
            }),
        });

        match self {
            RsvpError::RateLimited { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    let config = &state.config;

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/rsvp/validate", post(validate))
        .route("/rsvp/session/:session_id", get(heartbeat))
        .route("/rsvp/:code", get(fetch).put(submit));

    if config.metrics.enabled {
        app = app.route(&config.metrics.path, get(metrics));
    }

    let origins: Vec<HeaderValue> = config
        .origins
        .allowed
        .iter()
        .filter_map(|o| o.trim().trim_end_matches('/').parse().ok())
        .collect();
    if !origins.is_empty() {
        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true);
        app = app.layer(cors);
    }

    app.layer(middleware::map_response(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "rsvp-guard",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus exposition endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.flow.metrics().render(),
    )
}

/// `POST /rsvp/validate`
pub async fn validate(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: std::result::Result<Json<ValidateRequest>, JsonRejection>,
) -> Response {
    let ctx = client_context(&state.config, &headers, connect);
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return reject_body(rejection),
    };

    let flow = state.flow.clone();
    let result = run_detached(async move { flow.validate(&ctx, request).await }).await;

    match result {
        Ok(validated) => {
            let session_cookie = session_cookie(&state.config, validated.session.token.clone());
            let fingerprint_cookie =
                fingerprint_cookie(&state.config, validated.session.fingerprint.to_string());
            (
                AppendHeaders([
                    (header::SET_COOKIE, session_cookie.to_string()),
                    (header::SET_COOKIE, fingerprint_cookie.to_string()),
                ]),
                Json(ApiResponse::ok(ValidateResponse {
                    guest: validated.guest,
                    session_id: validated.session.token,
                    expires_at: validated.session.expires_at,
                })),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// `GET /rsvp/{code}`
pub async fn fetch(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let ctx = client_context(&state.config, &headers, connect);
    let token = session_token(&state.config, &headers);

    let flow = state.flow.clone();
    let result: Result<GuestSnapshot> =
        run_detached(async move { flow.fetch(&ctx, token.as_deref(), &code).await }).await;

    match result {
        Ok(snapshot) => Json(ApiResponse::ok(snapshot)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `PUT /rsvp/{code}`
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: std::result::Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let ctx = client_context(&state.config, &headers, connect);
    let token = session_token(&state.config, &headers);
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return reject_body(rejection),
    };

    let flow = state.flow.clone();
    let result =
        run_detached(async move { flow.submit(&ctx, token.as_deref(), &code, request).await }).await;

    // Recorded and Deceived are indistinguishable from here on
    match result {
        Ok(_) => (
            AppendHeaders([
                (
                    header::SET_COOKIE,
                    removal_cookie(&state.config.session.cookie_name).to_string(),
                ),
                (
                    header::SET_COOKIE,
                    removal_cookie(&state.config.session.fingerprint_cookie_name).to_string(),
                ),
            ]),
            Json(ApiResponse::ok(SubmitResponse {
                message: SUBMIT_MESSAGE,
            })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /rsvp/session/{session_id}`
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let ctx = client_context(&state.config, &headers, connect);
    debug!(session = token_prefix(&session_id), "Heartbeat");

    let flow = state.flow.clone();
    let result: Result<SessionStatus> =
        run_detached(async move { flow.heartbeat(&ctx, &session_id).await }).await;

    match result {
        Ok(status) => Json(ApiResponse::ok(status)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Run an operation in its own task so a dropped connection cannot cancel
/// it halfway through.
async fn run_detached<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "RSVP operation task failed");
            Err(RsvpError::Store("operation task failed".to_string()))
        }
    }
}

fn reject_body(rejection: JsonRejection) -> Response {
    debug!(status = %rejection.status(), reason = %rejection.body_text(), "Rejected request body");
    RsvpError::InvalidInput("malformed request body".to_string()).into_response()
}

fn client_context(
    config: &Config,
    headers: &HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> ClientContext {
    let text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    ClientContext {
        ip: client_ip(config, headers, connect.map(|ConnectInfo(addr)| addr)),
        user_agent: text(header::USER_AGENT).unwrap_or_default(),
        accept_language: text(header::ACCEPT_LANGUAGE),
        origin: text(header::ORIGIN),
        referer: text(header::REFERER),
    }
}

/// Client IP. Forwarding headers are honored only when configured, since
/// any client can send them.
pub fn client_ip(config: &Config, headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    if config.trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        let real_ip = || {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        };
        if let Some(ip) = forwarded.or_else(real_ip) {
            return ip;
        }
    }
    peer.map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn session_token(config: &Config, headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(|c| c.ok())
        .find(|c| c.name() == config.session.cookie_name)
        .map(|c| c.value().to_string())
}

fn session_cookie(config: &Config, token: String) -> Cookie<'static> {
    Cookie::build((config.session.cookie_name.clone(), token))
        .path(COOKIE_PATH)
        .http_only(true)
        .secure(config.production)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::minutes(
            config.session.idle_timeout_minutes,
        ))
        .build()
}

fn fingerprint_cookie(config: &Config, fingerprint: String) -> Cookie<'static> {
    Cookie::build((config.session.fingerprint_cookie_name.clone(), fingerprint))
        .path(COOKIE_PATH)
        .http_only(true)
        .secure(config.production)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::hours(
            config.session.fingerprint_cookie_hours,
        ))
        .build()
}

fn removal_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), String::new()))
        .path(COOKIE_PATH)
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::ZERO)
        .build()
}

async fn security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=(), payment=()"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
