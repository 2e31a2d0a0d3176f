// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Invite sessions.
//!
//! A validated invite code is exchanged for a short-lived opaque token
//! bound to exactly one guest. Every later guest-scoped request presents
//! the token:
//! - Sliding expiry: 2 hours of inactivity
//! - Single use: a completed submission closes the session for good
//! - In-flight claim: two concurrent submits cannot both reach the
//!   repository

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{Result, RsvpError, StoreError};
use crate::fingerprint::Fingerprint;
use crate::invite::InviteCode;
use crate::repository::{Guest, GuestDirectory};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Random bytes per token.
const TOKEN_BYTES: usize = 32;

/// Server-side state for one issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsvpSession {
    pub token: String,
    pub guest_id: String,
    pub invite_code: InviteCode,
    pub fingerprint: Fingerprint,
    pub ip: IpAddr,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub submitting: bool,
}

impl RsvpSession {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_idle(&self, now: DateTime<Utc>, idle: ChronoDuration) -> bool {
        now - self.last_accessed_at > idle
    }

    pub fn expires_at(&self, idle: ChronoDuration) -> DateTime<Utc> {
        self.last_accessed_at + idle
    }
}

/// Outcome of looking a token up in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    /// Live session, already refreshed (and claimed, for `claim`)
    Active(RsvpSession),
    Missing,
    Completed,
    Expired,
    /// Another submission holds the claim
    InFlight,
}

/// Session storage.
///
/// Each method is atomic per token. `touch` and `claim` both refresh
/// `last_accessed_at` on a live session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: RsvpSession) -> std::result::Result<(), StoreError>;

    async fn get(&self, token: &str) -> std::result::Result<Option<RsvpSession>, StoreError>;

    async fn touch(
        &self,
        token: &str,
        now: DateTime<Utc>,
        idle: ChronoDuration,
    ) -> std::result::Result<SessionLookup, StoreError>;

    /// Like `touch`, but also takes the in-flight submission flag.
    async fn claim(
        &self,
        token: &str,
        now: DateTime<Utc>,
        idle: ChronoDuration,
    ) -> std::result::Result<SessionLookup, StoreError>;

    async fn release(&self, token: &str) -> std::result::Result<(), StoreError>;

    /// Mark completed. `false` if the token is unknown or already completed.
    async fn complete(&self, token: &str, at: DateTime<Utc>) -> std::result::Result<bool, StoreError>;

    /// Remove idle sessions and completed ones older than `retention`.
    async fn sweep(
        &self,
        now: DateTime<Utc>,
        idle: ChronoDuration,
        retention: ChronoDuration,
    ) -> std::result::Result<usize, StoreError>;

    async fn len(&self) -> usize;
}

/// Process-local session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, RsvpSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lookup(
        &self,
        token: &str,
        now: DateTime<Utc>,
        idle: ChronoDuration,
        claim: bool,
    ) -> SessionLookup {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(token) else {
            return SessionLookup::Missing;
        };
        if session.is_completed() {
            return SessionLookup::Completed;
        }
        if session.is_idle(now, idle) {
            return SessionLookup::Expired;
        }
        if claim {
            if session.submitting {
                return SessionLookup::InFlight;
            }
            session.submitting = true;
        }
        session.last_accessed_at = now;
        SessionLookup::Active(session.clone())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: RsvpSession) -> std::result::Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session);
        Ok(())
    }

    async fn get(&self, token: &str) -> std::result::Result<Option<RsvpSession>, StoreError> {
        Ok(self.sessions.read().await.get(token).cloned())
    }

    async fn touch(
        &self,
        token: &str,
        now: DateTime<Utc>,
        idle: ChronoDuration,
    ) -> std::result::Result<SessionLookup, StoreError> {
        Ok(self.lookup(token, now, idle, false).await)
    }

    async fn claim(
        &self,
        token: &str,
        now: DateTime<Utc>,
        idle: ChronoDuration,
    ) -> std::result::Result<SessionLookup, StoreError> {
        Ok(self.lookup(token, now, idle, true).await)
    }

    async fn release(&self, token: &str) -> std::result::Result<(), StoreError> {
        if let Some(session) = self.sessions.write().await.get_mut(token) {
            session.submitting = false;
        }
        Ok(())
    }

    async fn complete(&self, token: &str, at: DateTime<Utc>) -> std::result::Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(token) {
            Some(session) if !session.is_completed() => {
                session.completed_at = Some(at);
                session.submitting = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep(
        &self,
        now: DateTime<Utc>,
        idle: ChronoDuration,
        retention: ChronoDuration,
    ) -> std::result::Result<usize, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| match session.completed_at {
            Some(completed_at) => now - completed_at <= retention,
            None => !session.is_idle(now, idle),
        });
        Ok(before - sessions.len())
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// What the client receives when a session is opened.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub fingerprint: Fingerprint,
    pub expires_at: DateTime<Utc>,
}

/// Heartbeat answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub minutes_remaining: i64,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies invite sessions.
pub struct SessionManager {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
    directory: GuestDirectory,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn SessionStore>,
        directory: GuestDirectory,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            directory,
            clock,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Resolve a raw invite code to its guest.
    ///
    /// Malformed codes never reach the directory. Malformed and unknown
    /// codes fail identically.
    pub async fn validate_code(&self, raw: &str) -> Result<Guest> {
        let Some(code) = InviteCode::parse(raw) else {
            debug!("Malformed invite code");
            return Err(RsvpError::InvalidCode);
        };
        match self.directory.find_by_code(&code).await? {
            Some(guest) => Ok(guest),
            None => {
                debug!("Unknown invite code");
                Err(RsvpError::InvalidCode)
            }
        }
    }

    /// Open a session for a guest whose code has just been validated.
    pub async fn create_session(
        &self,
        guest: &Guest,
        ip: IpAddr,
        fingerprint: &Fingerprint,
    ) -> Result<IssuedSession> {
        let now = self.clock.now();
        let token = generate_token();
        let session = RsvpSession {
            token: token.clone(),
            guest_id: guest.id.clone(),
            invite_code: guest.invite_code.clone(),
            fingerprint: fingerprint.clone(),
            ip,
            created_at: now,
            last_accessed_at: now,
            completed_at: None,
            submitting: false,
        };
        self.store.insert(session).await?;
        info!(
            guest_id = %guest.id,
            token = token_prefix(&token),
            "Invite session created"
        );
        Ok(IssuedSession {
            token,
            fingerprint: fingerprint.clone(),
            expires_at: now + self.config.idle_timeout(),
        })
    }

    /// Check a token and refresh its idle timer.
    pub async fn verify_session(&self, token: &str) -> Result<RsvpSession> {
        self.resolve(token, false).await
    }

    /// Verify and take the in-flight submission claim.
    pub async fn begin_submission(&self, token: &str) -> Result<RsvpSession> {
        self.resolve(token, true).await
    }

    /// Give the claim back after a failed write.
    pub async fn abort_submission(&self, token: &str) -> Result<()> {
        self.store.release(token).await?;
        debug!(token = token_prefix(token), "Submission claim released");
        Ok(())
    }

    /// Close the session permanently after a successful write.
    pub async fn complete_session(&self, token: &str) -> Result<()> {
        if self.store.complete(token, self.clock.now()).await? {
            info!(token = token_prefix(token), "Invite session completed");
            Ok(())
        } else {
            Err(RsvpError::InvalidSession)
        }
    }

    /// Heartbeat: verify (which refreshes) and report time left.
    pub async fn session_status(&self, token: &str) -> Result<SessionStatus> {
        let session = self.verify_session(token).await?;
        Ok(self.status_of(&session))
    }

    /// Time left on an already verified session.
    pub fn status_of(&self, session: &RsvpSession) -> SessionStatus {
        let expires_at = session.expires_at(self.config.idle_timeout());
        let minutes_remaining = (expires_at - self.clock.now()).num_minutes().max(0);
        SessionStatus {
            minutes_remaining,
            expires_at,
        }
    }

    /// Drop idle and long-completed sessions.
    pub async fn sweep(&self) -> usize {
        let result = self
            .store
            .sweep(
                self.clock.now(),
                self.config.idle_timeout(),
                self.config.completed_retention(),
            )
            .await;
        match result {
            Ok(removed) => {
                debug!(removed, "Session sweep complete");
                removed
            }
            Err(err) => {
                warn!(error = %err, "Session sweep failed");
                0
            }
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.store.len().await
    }

    async fn resolve(&self, token: &str, claim: bool) -> Result<RsvpSession> {
        if !is_well_formed_token(token) {
            return Err(RsvpError::SessionNotFound);
        }
        let now = self.clock.now();
        let idle = self.config.idle_timeout();
        let lookup = if claim {
            self.store.claim(token, now, idle).await?
        } else {
            self.store.touch(token, now, idle).await?
        };
        match lookup {
            SessionLookup::Active(session) => Ok(session),
            SessionLookup::Missing => Err(RsvpError::SessionNotFound),
            SessionLookup::Expired => {
                debug!(token = token_prefix(token), "Session expired");
                Err(RsvpError::SessionExpired)
            }
            SessionLookup::Completed | SessionLookup::InFlight => {
                debug!(token = token_prefix(token), ?lookup, "Session not usable");
                Err(RsvpError::InvalidSession)
            }
        }
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_BYTES * 2 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Enough of a token to correlate log lines without leaking it.
pub fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or("")
}
