// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Seeded guest directory and flow construction.

use rsvp_guard::{
    clock::MockClock,
    config::{Config, OriginConfig},
    events::{EventKind, SecurityEvent},
    flow::{ClientContext, RsvpFlow, SubmitRequest, ValidateRequest},
    handlers::{router, AppState},
    invite::InviteCode,
    repository::{AttendanceStatus, Guest, InMemoryGuestRepository, MealOption},
};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub const ORIGIN: &str = "https://wedding.example";
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";

/// A flow over an in-memory directory with a controllable clock.
pub struct TestApp {
    pub flow: Arc<RsvpFlow>,
    pub repo: Arc<InMemoryGuestRepository>,
    pub clock: MockClock,
}

impl TestApp {
    pub fn router(&self) -> axum::Router {
        router(Arc::new(AppState {
            flow: self.flow.clone(),
            config: self.flow.config().clone(),
        }))
    }

    /// Validate `code` from `ip` and return the session token.
    pub async fn open_session(&self, ip: &str, code: &str) -> String {
        self.flow
            .validate(&client(ip), validate_request(code))
            .await
            .expect("validation should succeed")
            .session
            .token
    }
}

pub fn guest(id: &str, code: &str, first: &str, plus_one: bool) -> Guest {
    Guest {
        id: id.to_string(),
        first_name: first.to_string(),
        last_name: "Guest".to_string(),
        email: Some(format!("{}@example.com", first.to_lowercase())),
        invite_code: InviteCode::parse(code).expect("seed code"),
        rsvp_status: AttendanceStatus::Pending,
        meal_preference: None,
        dietary_restrictions: None,
        plus_one_allowed: plus_one,
        plus_one_name: None,
        plus_one_meal: None,
    }
}

pub fn guests() -> Vec<Guest> {
    vec![
        guest("g1", "WED123", "Ada", true),
        guest("g2", "WED456", "Grace", false),
        guest("g3", "ABC789", "Edsger", false),
    ]
}

pub fn meals() -> Vec<MealOption> {
    ["chicken", "fish", "vegan"]
        .iter()
        .map(|id| MealOption {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
        })
        .collect()
}

pub fn test_config() -> Config {
    Config {
        origins: OriginConfig {
            allowed: vec![ORIGIN.to_string()],
            require_header: false,
        },
        ..Config::default()
    }
}

pub fn spawn_app(config: Config) -> TestApp {
    let clock = MockClock::default();
    let repo = Arc::new(InMemoryGuestRepository::new(guests(), meals()));
    let flow = RsvpFlow::builder(config, repo.clone())
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("metrics registry");
    TestApp {
        flow: Arc::new(flow),
        repo,
        clock,
    }
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("test ip")
}

/// A browser on `ip` posting from the wedding site.
pub fn client(ip_str: &str) -> ClientContext {
    ClientContext {
        ip: ip(ip_str),
        user_agent: USER_AGENT.to_string(),
        accept_language: Some("en-GB,en;q=0.9".to_string()),
        origin: Some(ORIGIN.to_string()),
        referer: None,
    }
}

pub fn validate_request(code: &str) -> ValidateRequest {
    ValidateRequest {
        invite_code: code.to_string(),
        email: None,
    }
}

/// A human-paced, honeypot-clean submission.
pub fn submit_request(guest_id: &str) -> SubmitRequest {
    SubmitRequest {
        guest_id: guest_id.to_string(),
        attending: true,
        meal_choice: Some("fish".to_string()),
        dietary_restrictions: None,
        plus_one_name: None,
        plus_one_meal: None,
        message: None,
        email: None,
        client_elapsed_ms: 8_000,
        decoys: HashMap::new(),
    }
}

/// Wait for the event writer to deliver at least `count` events of `kind`.
pub async fn wait_for_events(flow: &RsvpFlow, kind: EventKind, count: usize) -> Vec<SecurityEvent> {
    for _ in 0..200 {
        let events: Vec<SecurityEvent> = flow
            .recent_events(usize::MAX)
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect();
        if events.len() >= count {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {} {} events", count, kind);
}
