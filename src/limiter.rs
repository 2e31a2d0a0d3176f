// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed-window rate limiter with escalating lockouts.
//!
//! Implements three independent scopes per sensitive operation:
//! 1. Per-IP
//! 2. Per-email (when the request carries one)
//! 3. A global ceiling
//!
//! A key that goes over its limit on an escalating tier is hard-blocked
//! for `min(2 × window, 24h)`. Read-only tiers are IP-only and never
//! escalate.

use crate::clock::{Clock, SystemClock};
use crate::config::{Limit, RateLimitConfig};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Result of a rate limit check.
#[derive(Debug, Clone)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed {
        /// Remaining requests in current window
        remaining: u32,
        /// Time until window resets
        reset_in: Duration,
    },
    /// Request is rate limited
    Limited {
        /// Reason for rate limiting
        reason: RateLimitReason,
        /// Time until rate limit expires
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    /// Seconds a client should wait, rounded up, never zero.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RateLimitResult::Allowed { .. } => None,
            RateLimitResult::Limited { retry_after, .. } => Some(ceil_secs(*retry_after)),
        }
    }
}

/// Reason for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// IP exceeded its limit or is blocked
    IpRateExceeded,
    /// Email exceeded its limit or is blocked
    EmailRateExceeded,
    /// Global ceiling reached
    GlobalRateExceeded,
}

impl RateLimitReason {
    pub fn scope(&self) -> Scope {
        match self {
            Self::IpRateExceeded => Scope::Ip,
            Self::EmailRateExceeded => Scope::Email,
            Self::GlobalRateExceeded => Scope::Global,
        }
    }
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IpRateExceeded => write!(f, "IP rate limit exceeded"),
            Self::EmailRateExceeded => write!(f, "Email rate limit exceeded"),
            Self::GlobalRateExceeded => write!(f, "Global rate limit exceeded"),
        }
    }
}

/// Counter scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Ip,
    Email,
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Email => "email",
            Self::Global => "global",
        }
    }

    fn reason(&self) -> RateLimitReason {
        match self {
            Self::Ip => RateLimitReason::IpRateExceeded,
            Self::Email => RateLimitReason::EmailRateExceeded,
            Self::Global => RateLimitReason::GlobalRateExceeded,
        }
    }
}

/// Public operation a check is made for. Each tier keeps its own counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Validate,
    Submit,
    Read,
    Heartbeat,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Submit => "submit",
            Self::Read => "read",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// Counter rule applied to a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub max: u32,
    pub window: ChronoDuration,
    /// Hard block applied when `max` is exceeded; `None` refuses without
    /// blocking until the window rolls over.
    pub block: Option<ChronoDuration>,
}

impl Rule {
    /// Escalating rule: block for `min(2 × window, ceiling)`.
    pub fn escalating(limit: Limit, ceiling: ChronoDuration) -> Self {
        let window = limit.window();
        Self {
            max: limit.max,
            window,
            block: Some((window * 2).min(ceiling)),
        }
    }

    /// Non-escalating rule.
    pub fn light(limit: Limit) -> Self {
        Self {
            max: limit.max,
            window: limit.window(),
            block: None,
        }
    }
}

/// Per-key window counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

/// Outcome of a single counter hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    Allowed {
        remaining: u32,
        reset_at: DateTime<Utc>,
    },
    Limited {
        retry_at: DateTime<Utc>,
    },
}

impl RateLimitEntry {
    fn empty(now: DateTime<Utc>, rule: &Rule) -> Self {
        Self {
            count: 0,
            reset_at: now + rule.window,
            blocked_until: None,
        }
    }

    /// Record one attempt. Read, compare and write happen together; the
    /// caller holds whatever lock makes this atomic for the key.
    pub fn apply(&mut self, rule: &Rule, now: DateTime<Utc>) -> Hit {
        let window_over = match self.blocked_until {
            Some(until) if now < until => return Hit::Limited { retry_at: until },
            Some(_) => true,
            None => now >= self.reset_at,
        };
        if window_over {
            *self = Self::empty(now, rule);
        }

        if self.count >= rule.max {
            return match rule.block {
                Some(block) => {
                    self.count = self.count.saturating_add(1);
                    let until = now + block;
                    self.blocked_until = Some(until);
                    Hit::Limited { retry_at: until }
                }
                None => Hit::Limited {
                    retry_at: self.reset_at,
                },
            };
        }

        self.count += 1;
        Hit::Allowed {
            remaining: rule.max - self.count,
            reset_at: self.reset_at,
        }
    }

    /// Both the window and any block have run out.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at && self.blocked_until.map_or(true, |until| now >= until)
    }
}

/// Storage for rate-limit counters.
///
/// Implementations must make `hit` atomic per key: two concurrent hits on
/// a key at `max - 1` must not both be allowed. A shared deployment needs
/// a backend with atomic increment and TTL behind this trait.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(&self, key: &str, rule: &Rule, now: DateTime<Utc>) -> Result<Hit, StoreError>;

    /// Drop entries whose window and block have both expired.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Number of tracked keys.
    async fn len(&self) -> usize;
}

/// Process-local counter store.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    entries: RwLock<HashMap<String, RateLimitEntry>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(&self, key: &str, rule: &Rule, now: DateTime<Utc>) -> Result<Hit, StoreError> {
        // No await between lookup and write: once the lock is held the
        // attempt is committed even if the caller goes away.
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::empty(now, rule));
        Ok(entry.apply(rule, now))
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Thread-safe rate limiter.
pub struct RateLimiter {
    /// Configuration
    config: RateLimitConfig,
    /// Counter storage
    store: Arc<dyn RateLimitStore>,
    /// Time source
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new in-memory rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(
            config,
            Arc::new(InMemoryRateLimitStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn with_store(
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check one counter.
    pub async fn check(&self, scope: Scope, tier: Tier, identity: &str, rule: Rule) -> RateLimitResult {
        let key = format!("{}:{}:{}", scope.as_str(), tier.as_str(), identity);
        let now = self.clock.now();

        let hit = match self.store.hit(&key, &rule, now).await {
            Ok(hit) => hit,
            Err(err) => {
                // Fail closed
                warn!(%key, error = %err, "Rate limit store failed, rejecting");
                Hit::Limited {
                    retry_at: now + rule.window.min(ChronoDuration::minutes(1)),
                }
            }
        };

        match hit {
            Hit::Allowed {
                remaining,
                reset_at,
            } => RateLimitResult::Allowed {
                remaining,
                reset_in: to_std(reset_at - now),
            },
            Hit::Limited { retry_at } => {
                let retry_after = to_std(retry_at - now);
                debug!(%key, ?retry_after, "Rate limit exceeded");
                RateLimitResult::Limited {
                    reason: scope.reason(),
                    retry_after,
                }
            }
        }
    }

    /// Check every scope configured for a tier, in the order IP, email,
    /// global. The first limited scope is returned and later scopes are
    /// not charged.
    pub async fn check_tier(&self, tier: Tier, ip: IpAddr, email: Option<&str>) -> RateLimitResult {
        let ip_key = ip.to_string();
        let tier_config = match tier {
            Tier::Validate => self.config.validate,
            Tier::Submit => self.config.submit,
            Tier::Read => {
                return self
                    .check(Scope::Ip, tier, &ip_key, Rule::light(self.config.read))
                    .await
            }
            Tier::Heartbeat => {
                return self
                    .check(Scope::Ip, tier, &ip_key, Rule::light(self.config.heartbeat))
                    .await
            }
        };
        let ceiling = self.config.max_block();

        let mut checks: Vec<(Scope, String, Rule)> = Vec::with_capacity(3);
        checks.push((Scope::Ip, ip_key, Rule::escalating(tier_config.per_ip, ceiling)));
        if let Some(email) = email.map(normalize_email).filter(|e| !e.is_empty()) {
            checks.push((
                Scope::Email,
                email,
                Rule::escalating(tier_config.per_email, ceiling),
            ));
        }
        checks.push((
            Scope::Global,
            "*".to_string(),
            Rule::escalating(tier_config.global, ceiling),
        ));

        let mut tightest: Option<RateLimitResult> = None;
        for (scope, identity, rule) in checks {
            let result = self.check(scope, tier, &identity, rule).await;
            match result {
                RateLimitResult::Limited { .. } => return result,
                RateLimitResult::Allowed { remaining, .. } => {
                    let tighter = match &tightest {
                        Some(RateLimitResult::Allowed { remaining: r, .. }) => remaining < *r,
                        _ => true,
                    };
                    if tighter {
                        tightest = Some(result);
                    }
                }
            }
        }

        tightest.unwrap_or(RateLimitResult::Allowed {
            remaining: 0,
            reset_in: Duration::ZERO,
        })
    }

    /// Clean up expired entries (should be called periodically).
    pub async fn cleanup(&self) -> usize {
        match self.store.sweep(self.clock.now()).await {
            Ok(removed) => {
                debug!(removed, "Rate limit sweep complete");
                removed
            }
            Err(err) => {
                warn!(error = %err, "Rate limit sweep failed");
                0
            }
        }
    }

    /// Number of live counters.
    pub async fn tracked_keys(&self) -> usize {
        self.store.len().await
    }
}

/// Normalize an email for use as a counter identity.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn to_std(d: ChronoDuration) -> Duration {
    d.to_std().unwrap_or(Duration::ZERO)
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}
