// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! RSVP Guard Service
//!
//! Serves the public guest RSVP endpoints behind rate limiting, bot
//! detection and invite sessions:
//!
//! - `POST /rsvp/validate`: exchange an invite code for a session
//! - `GET /rsvp/{code}`: load the guest's RSVP for editing
//! - `PUT /rsvp/{code}`: submit the RSVP (once per session)
//! - `GET /rsvp/session/{id}`: session heartbeat
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables (a `.env` file is
//! read first if present):
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `ALLOWED_ORIGINS`: Comma-separated origins allowed to submit
//! - `RSVP_PRODUCTION`: Mark cookies `Secure` (default: false)
//! - `TRUST_FORWARDED_FOR`: Take the client IP from proxy headers (default: false)
//! - `SESSION_IDLE_MINUTES`: Session inactivity timeout (default: 120)
//! - `HONEYPOT_MIN_ELAPSED_MS`: Minimum human form time (default: 3000)
//! - `REPOSITORY_TIMEOUT_MS`: Guest directory call timeout (default: 5000)
//! - `SWEEP_INTERVAL_SECS`: Background sweep period (default: 300)
//! - `EVENT_QUEUE_CAPACITY`: Security event queue size (default: 1024)
//! - `GUEST_SEED_PATH`: JSON seed for the in-memory guest directory

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rsvp_guard::{
    config::Config,
    flow::RsvpFlow,
    handlers::{router, AppState},
    repository::InMemoryGuestRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = load_config();
    info!(
        bind_addr = %config.bind_addr,
        production = config.production,
        allowed_origins = config.origins.allowed.len(),
        session_idle_minutes = config.session.idle_timeout_minutes,
        "Starting RSVP guard"
    );

    // Guest directory
    let repository = match std::env::var("GUEST_SEED_PATH").ok().map(PathBuf::from) {
        Some(path) => {
            let repository = InMemoryGuestRepository::from_json_file(&path)?;
            info!(path = %path.display(), "Loaded guest seed");
            repository
        }
        None => {
            warn!("GUEST_SEED_PATH not set, guest directory is empty");
            InMemoryGuestRepository::default()
        }
    };

    // Create application state
    let flow = RsvpFlow::builder(config.clone(), Arc::new(repository)).build()?;
    let state = Arc::new(AppState::new(flow));

    // Spawn sweep task
    let sweep_state = state.clone();
    let sweep_interval = config.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            sweep_state.flow.sweep().await;
        }
    });

    // Build router
    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Load configuration from environment variables.
fn load_config() -> Config {
    let defaults = Config::default();
    Config {
        bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        production: env_parse("RSVP_PRODUCTION").unwrap_or(false),
        trust_forwarded_for: env_parse("TRUST_FORWARDED_FOR").unwrap_or(false),
        origins: rsvp_guard::config::OriginConfig {
            allowed: std::env::var("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            ..defaults.origins
        },
        session: rsvp_guard::config::SessionConfig {
            idle_timeout_minutes: env_parse("SESSION_IDLE_MINUTES")
                .unwrap_or(defaults.session.idle_timeout_minutes),
            ..defaults.session
        },
        honeypot: rsvp_guard::config::HoneypotConfig {
            min_elapsed_ms: env_parse("HONEYPOT_MIN_ELAPSED_MS")
                .unwrap_or(defaults.honeypot.min_elapsed_ms),
            ..defaults.honeypot
        },
        events: rsvp_guard::config::EventLogConfig {
            queue_capacity: env_parse("EVENT_QUEUE_CAPACITY")
                .unwrap_or(defaults.events.queue_capacity),
            ..defaults.events
        },
        repository_timeout_ms: env_parse("REPOSITORY_TIMEOUT_MS")
            .unwrap_or(defaults.repository_timeout_ms),
        sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS")
            .unwrap_or(defaults.sweep_interval_secs),
        ..defaults
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
