// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for the RSVP guard.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metric handles. Cloning shares the underlying series.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    rate_limited: IntCounterVec,
    security_events: IntCounterVec,
    events_dropped: IntCounter,
    active_sessions: IntGauge,
    rate_limit_keys: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("rsvp_requests_total", "RSVP operations by outcome"),
            &["operation", "outcome"],
        )?;
        let rate_limited = IntCounterVec::new(
            Opts::new("rsvp_rate_limited_total", "Requests refused by the rate limiter"),
            &["scope"],
        )?;
        let security_events = IntCounterVec::new(
            Opts::new("rsvp_security_events_total", "Security events recorded"),
            &["kind"],
        )?;
        let events_dropped = IntCounter::new(
            "rsvp_security_events_dropped_total",
            "Security events dropped because the log queue was full",
        )?;
        let active_sessions = IntGauge::new("rsvp_sessions", "Invite sessions held in the store")?;
        let rate_limit_keys =
            IntGauge::new("rsvp_rate_limit_keys", "Rate limit counters held in the store")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(security_events.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(rate_limit_keys.clone()))?;

        Ok(Self {
            registry,
            requests,
            rate_limited,
            security_events,
            events_dropped,
            active_sessions,
            rate_limit_keys,
        })
    }

    pub fn observe_request(&self, operation: &str, outcome: &str) {
        self.requests.with_label_values(&[operation, outcome]).inc();
    }

    pub fn observe_rate_limited(&self, scope: &str) {
        self.rate_limited.with_label_values(&[scope]).inc();
    }

    pub fn observe_security_event(&self, kind: &str) {
        self.security_events.with_label_values(&[kind]).inc();
    }

    pub fn observe_event_dropped(&self) {
        self.events_dropped.inc();
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.set(count as i64);
    }

    pub fn set_rate_limit_keys(&self, count: usize) {
        self.rate_limit_keys.set(count as i64);
    }

    /// Render all series in the Prometheus text format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %err, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
