// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the RSVP guard service.
//!
//! Every field has a default, so an empty document (or no environment at
//! all) yields a working single-node configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the RSVP guard service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Production mode: session cookies are marked `Secure`
    #[serde(default)]
    pub production: bool,

    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that overwrites these headers.
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Origin allow-list
    #[serde(default)]
    pub origins: OriginConfig,

    /// Rate limiting tiers
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Invite session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Bot / honeypot configuration
    #[serde(default)]
    pub honeypot: HoneypotConfig,

    /// Security event log configuration
    #[serde(default)]
    pub events: EventLogConfig,

    /// Free-text sanitization
    #[serde(default)]
    pub sanitize: SanitizeConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Upper bound on any single guest repository call (default: 5000)
    #[serde(default = "default_repository_timeout_ms")]
    pub repository_timeout_ms: u64,

    /// Period of the background sweep over limiter, session and
    /// suspicious-IP state (default: 300)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Permitted request origins.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OriginConfig {
    /// Exact origins (`scheme://host[:port]`) allowed to call mutating
    /// endpoints.
    #[serde(default)]
    pub allowed: Vec<String>,

    /// Reject mutating requests that carry neither `Origin` nor `Referer`.
    #[serde(default)]
    pub require_header: bool,
}

/// A single counter rule: at most `max` hits per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub max: u32,
    pub window_secs: u64,
}

impl Limit {
    pub const fn new(max: u32, window_secs: u64) -> Self {
        Self { max, window_secs }
    }

    pub fn window(&self) -> chrono::Duration {
        clamped_seconds(self.window_secs)
    }
}

/// Three-scope limits for a sensitive operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierConfig {
    pub per_ip: Limit,
    pub per_email: Limit,
    pub global: Limit,
}

/// Rate limiting tiers, one per public operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Invite code validation (default: 5/hour/IP, 10/day/email, 100/hour)
    #[serde(default = "default_validate_tier")]
    pub validate: TierConfig,

    /// RSVP submission (default: 3/hour/IP, 5/day/email, 50/hour)
    #[serde(default = "default_submit_tier")]
    pub submit: TierConfig,

    /// Read-only guest lookup, IP only, no lockout (default: 30/minute)
    #[serde(default = "default_read_limit")]
    pub read: Limit,

    /// Session heartbeat, IP only, no lockout (default: 50/minute)
    #[serde(default = "default_heartbeat_limit")]
    pub heartbeat: Limit,

    /// Longest hard block a tripped key can receive (default: 24h)
    #[serde(default = "default_max_block_secs")]
    pub max_block_secs: u64,
}

/// Invite session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity timeout (default: 120)
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: i64,

    /// How long completed sessions are kept before the sweep removes them
    /// (default: 1440)
    #[serde(default = "default_completed_retention_minutes")]
    pub completed_retention_minutes: i64,

    /// Session cookie name (default: rsvp_session)
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,

    /// Fingerprint marker cookie name (default: rsvp_fp)
    #[serde(default = "default_fingerprint_cookie")]
    pub fingerprint_cookie_name: String,

    /// Fingerprint marker lifetime (default: 24)
    #[serde(default = "default_fingerprint_cookie_hours")]
    pub fingerprint_cookie_hours: i64,
}

/// Bot / honeypot detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoneypotConfig {
    /// Hidden form fields a human never fills in
    #[serde(default = "default_decoy_fields")]
    pub decoy_fields: Vec<String>,

    /// Minimum render-to-submit time for a human (default: 3000)
    #[serde(default = "default_min_elapsed_ms")]
    pub min_elapsed_ms: u64,

    /// Reject on the client-reported timing. The value is attacker
    /// controlled, so it can be switched off without losing the decoys.
    #[serde(default = "default_true")]
    pub enforce_timing: bool,
}

/// Security event log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Bounded queue between request handlers and the writer (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Recent events kept in memory for review (default: 10000)
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

/// Free-text sanitization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizeConfig {
    /// Maximum characters kept per free-text field (default: 500)
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_repository_timeout_ms() -> u64 {
    5000
}

fn default_sweep_interval_secs() -> u64 {
    300
}

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

fn default_validate_tier() -> TierConfig {
    TierConfig {
        per_ip: Limit::new(5, HOUR),
        per_email: Limit::new(10, DAY),
        global: Limit::new(100, HOUR),
    }
}

fn default_submit_tier() -> TierConfig {
    TierConfig {
        per_ip: Limit::new(3, HOUR),
        per_email: Limit::new(5, DAY),
        global: Limit::new(50, HOUR),
    }
}

fn default_read_limit() -> Limit {
    Limit::new(30, 60)
}

fn default_heartbeat_limit() -> Limit {
    Limit::new(50, 60)
}

fn default_max_block_secs() -> u64 {
    DAY
}

fn default_idle_timeout_minutes() -> i64 {
    120
}

fn default_completed_retention_minutes() -> i64 {
    24 * 60
}

fn default_session_cookie() -> String {
    "rsvp_session".to_string()
}

fn default_fingerprint_cookie() -> String {
    "rsvp_fp".to_string()
}

fn default_fingerprint_cookie_hours() -> i64 {
    24
}

fn default_decoy_fields() -> Vec<String> {
    vec!["website".to_string(), "company".to_string()]
}

fn default_min_elapsed_ms() -> u64 {
    3000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_memory_capacity() -> usize {
    10_000
}

fn default_max_text_len() -> usize {
    500
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            production: false,
            trust_forwarded_for: false,
            origins: OriginConfig::default(),
            rate_limit: RateLimitConfig::default(),
            session: SessionConfig::default(),
            honeypot: HoneypotConfig::default(),
            events: EventLogConfig::default(),
            sanitize: SanitizeConfig::default(),
            metrics: MetricsConfig::default(),
            repository_timeout_ms: default_repository_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            validate: default_validate_tier(),
            submit: default_submit_tier(),
            read: default_read_limit(),
            heartbeat: default_heartbeat_limit(),
            max_block_secs: default_max_block_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: default_idle_timeout_minutes(),
            completed_retention_minutes: default_completed_retention_minutes(),
            cookie_name: default_session_cookie(),
            fingerprint_cookie_name: default_fingerprint_cookie(),
            fingerprint_cookie_hours: default_fingerprint_cookie_hours(),
        }
    }
}

impl Default for HoneypotConfig {
    fn default() -> Self {
        Self {
            decoy_fields: default_decoy_fields(),
            min_elapsed_ms: default_min_elapsed_ms(),
            enforce_timing: default_true(),
        }
    }
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            max_text_len: default_max_text_len(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl RateLimitConfig {
    /// Get the hard block ceiling
    pub fn max_block(&self) -> chrono::Duration {
        clamped_seconds(self.max_block_secs)
    }
}

impl SessionConfig {
    /// Get the idle timeout
    pub fn idle_timeout(&self) -> chrono::Duration {
        clamped_minutes(self.idle_timeout_minutes)
    }

    pub fn completed_retention(&self) -> chrono::Duration {
        clamped_minutes(self.completed_retention_minutes)
    }
}

/// Longest configurable window, block or timeout: one year.
const MAX_DURATION_SECS: u64 = 366 * 24 * 60 * 60;

fn clamped_seconds(secs: u64) -> chrono::Duration {
    // Bounded well inside chrono's range
    chrono::Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

fn clamped_minutes(minutes: i64) -> chrono::Duration {
    clamped_seconds(u64::try_from(minutes).unwrap_or(0).saturating_mul(60))
}

impl Config {
    /// Get the repository call timeout
    pub fn repository_timeout(&self) -> Duration {
        Duration::from_millis(self.repository_timeout_ms)
    }

    /// Get the sweep period
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
