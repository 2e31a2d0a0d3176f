// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! RSVP flow orchestration.
//!
//! Sequences origin checks, fingerprinting, rate limiting, bot detection
//! and session verification for the four public operations:
//! 1. Validate: invite code in, session out
//! 2. Fetch: session in, guest snapshot out
//! 3. Submit: session and answers in, one repository write
//! 4. Heartbeat: session in, time remaining out
//!
//! No guest data is read or written before the session is verified, and
//! every rejection is mirrored to the security event log.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Result, RsvpError};
use crate::events::{EventKind, EventSink, MemorySink, SecurityEvent, SecurityEventLog, TracingSink};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::honeypot::{HoneypotValidator, ValidationResult};
use crate::invite::InviteCode;
use crate::limiter::{InMemoryRateLimitStore, RateLimitResult, RateLimitStore, RateLimiter, Tier};
use crate::metrics::Metrics;
use crate::origin::OriginPolicy;
use crate::repository::{
    AttendanceStatus, Guest, GuestDirectory, GuestRepository, MealOption, ResponseVersion,
    RsvpSubmission,
};
use crate::sanitize::TextSanitizer;
use crate::session::{
    token_prefix, InMemorySessionStore, IssuedSession, RsvpSession, SessionManager, SessionStatus,
    SessionStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Response versions returned with a snapshot.
const HISTORY_LIMIT: usize = 5;

/// Longest email accepted.
const MAX_EMAIL_LEN: usize = 254;

/// What the flow knows about the caller, extracted from the transport.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ip: IpAddr,
    pub user_agent: String,
    pub accept_language: Option<String>,
    pub origin: Option<String>,
    pub referer: Option<String>,
}

impl ClientContext {
    pub fn new(ip: IpAddr, user_agent: impl Into<String>) -> Self {
        Self {
            ip,
            user_agent: user_agent.into(),
            accept_language: None,
            origin: None,
            referer: None,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(self.ip, &self.user_agent, self.accept_language.as_deref())
    }
}

/// Body of `POST /rsvp/validate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ValidateRequest {
    pub invite_code: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Body of `PUT /rsvp/{code}`.
///
/// Fields outside the schema land in `decoys` and are rejected unless they
/// are configured honeypot names.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub guest_id: String,
    pub attending: bool,
    #[serde(default)]
    pub meal_choice: Option<String>,
    #[serde(default)]
    pub dietary_restrictions: Option<String>,
    #[serde(default)]
    pub plus_one_name: Option<String>,
    #[serde(default)]
    pub plus_one_meal: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Render-to-submit time reported by the form
    pub client_elapsed_ms: u64,
    /// Hidden form fields, keyed by name
    #[serde(flatten)]
    pub decoys: HashMap<String, Value>,
}

/// The limited guest view returned by a successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSummary {
    pub first_name: String,
    pub last_name: String,
    pub plus_one_allowed: bool,
    pub has_responded: bool,
}

impl From<&Guest> for GuestSummary {
    fn from(guest: &Guest) -> Self {
        Self {
            first_name: guest.first_name.clone(),
            last_name: guest.last_name.clone(),
            plus_one_allowed: guest.plus_one_allowed,
            has_responded: guest.has_responded(),
        }
    }
}

/// Result of a successful validation.
#[derive(Debug, Clone)]
pub struct ValidatedInvite {
    pub guest: GuestSummary,
    pub session: IssuedSession,
}

/// Everything the edit form needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSnapshot {
    pub guest: Guest,
    pub meal_options: Vec<MealOption>,
    pub history: Vec<ResponseVersion>,
}

/// Result of a submission that passed request validation.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Written to the repository; the session is now closed
    Recorded(Guest),
    /// Looked automated. Nothing was written, but the client is answered
    /// as if it had been.
    Deceived,
}

/// Counts removed by one background sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rate_limit_keys: usize,
    pub sessions: usize,
    pub suspicious_ips: usize,
}

/// Builds an [`RsvpFlow`]. Stores and clock default to in-memory and
/// system time.
pub struct RsvpFlowBuilder {
    config: Config,
    repository: Arc<dyn GuestRepository>,
    clock: Arc<dyn Clock>,
    rate_limit_store: Arc<dyn RateLimitStore>,
    session_store: Arc<dyn SessionStore>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl RsvpFlowBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limit_store = store;
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = store;
        self
    }

    /// Add an event sink next to the built-in tracing and memory sinks.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Assemble the flow. Must be called inside a tokio runtime: the
    /// event writer task is spawned here.
    pub fn build(self) -> std::result::Result<RsvpFlow, prometheus::Error> {
        let metrics = Metrics::new()?;
        let config = self.config;

        let recent = Arc::new(MemorySink::new(config.events.memory_capacity));
        let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingSink), recent.clone()];
        sinks.extend(self.sinks);

        let (events, _writer) = SecurityEventLog::spawn(
            &config.events,
            sinks,
            config.rate_limit.validate.per_ip.window(),
            self.clock.clone(),
            metrics.clone(),
        );

        let directory = GuestDirectory::new(self.repository, config.repository_timeout());
        let sessions = SessionManager::new(
            config.session.clone(),
            self.session_store,
            directory.clone(),
            self.clock.clone(),
        );

        Ok(RsvpFlow {
            limiter: RateLimiter::with_store(
                config.rate_limit.clone(),
                self.rate_limit_store,
                self.clock.clone(),
            ),
            clock: self.clock,
            origins: OriginPolicy::new(&config.origins),
            honeypot: HoneypotValidator::new(config.honeypot.clone()),
            sanitizer: TextSanitizer::new(&config.sanitize),
            sessions,
            directory,
            events,
            recent,
            metrics,
            config,
        })
    }
}

/// The RSVP access-control pipeline.
pub struct RsvpFlow {
    config: Config,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    origins: OriginPolicy,
    honeypot: HoneypotValidator,
    sanitizer: TextSanitizer,
    sessions: SessionManager,
    directory: GuestDirectory,
    events: SecurityEventLog,
    recent: Arc<MemorySink>,
    metrics: Metrics,
}

/// Event context for one failure.
struct Failure<'a> {
    operation: &'static str,
    kind: EventKind,
    ctx: &'a ClientContext,
    fingerprint: &'a Fingerprint,
    invite_code: Option<&'a str>,
    email: Option<&'a str>,
}

impl RsvpFlow {
    pub fn builder(config: Config, repository: Arc<dyn GuestRepository>) -> RsvpFlowBuilder {
        RsvpFlowBuilder {
            config,
            repository,
            clock: Arc::new(SystemClock),
            rate_limit_store: Arc::new(InMemoryRateLimitStore::new()),
            session_store: Arc::new(InMemorySessionStore::new()),
            sinks: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn events(&self) -> &SecurityEventLog {
        &self.events
    }

    /// Most recent security events, newest first. Writes are asynchronous,
    /// so an event recorded a moment ago may not be visible yet.
    pub fn recent_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.recent.recent(limit)
    }

    /// Exchange an invite code for a session.
    pub async fn validate(&self, ctx: &ClientContext, request: ValidateRequest) -> Result<ValidatedInvite> {
        let fp = ctx.fingerprint();
        let failure = Failure {
            operation: "validate",
            kind: EventKind::ValidationFailed,
            ctx,
            fingerprint: &fp,
            invite_code: Some(&request.invite_code),
            email: request.email.as_deref(),
        };

        let result = self.run_validate(ctx, &fp, &request).await;
        self.finish(&failure, result)
    }

    async fn run_validate(
        &self,
        ctx: &ClientContext,
        fp: &Fingerprint,
        request: &ValidateRequest,
    ) -> Result<ValidatedInvite> {
        self.origins.check(ctx.origin.as_deref(), ctx.referer.as_deref())?;
        let email = normalize_email(request.email.as_deref())?;
        self.admit(ctx, Tier::Validate, email.as_deref()).await?;

        let guest = self.sessions.validate_code(&request.invite_code).await?;
        let session = self.sessions.create_session(&guest, ctx.ip, fp).await?;

        info!(guest_id = %guest.id, ip = %ctx.ip, "Invite code validated");
        Ok(ValidatedInvite {
            guest: GuestSummary::from(&guest),
            session,
        })
    }

    /// Load the guest, meal options and recent answers for an open session.
    pub async fn fetch(&self, ctx: &ClientContext, token: Option<&str>, path_code: &str) -> Result<GuestSnapshot> {
        let fp = ctx.fingerprint();
        let failure = Failure {
            operation: "fetch",
            kind: EventKind::ValidationFailed,
            ctx,
            fingerprint: &fp,
            invite_code: Some(path_code),
            email: None,
        };

        let result = self.run_fetch(ctx, &fp, token, path_code).await;
        self.finish(&failure, result)
    }

    async fn run_fetch(
        &self,
        ctx: &ClientContext,
        fp: &Fingerprint,
        token: Option<&str>,
        path_code: &str,
    ) -> Result<GuestSnapshot> {
        self.admit(ctx, Tier::Read, None).await?;

        let token = token.ok_or(RsvpError::SessionNotFound)?;
        let session = self.sessions.verify_session(token).await?;
        self.check_binding(&session, ctx, fp, path_code, None)?;

        let guest = self
            .directory
            .find(&session.guest_id)
            .await?
            .ok_or(RsvpError::SessionNotFound)?;
        let meal_options = self.directory.meal_options(&guest.id).await?;
        let history = self.directory.history(&guest.id, HISTORY_LIMIT).await?;

        Ok(GuestSnapshot {
            guest,
            meal_options,
            history,
        })
    }

    /// Record a guest's answers. At most one repository write per session.
    pub async fn submit(
        &self,
        ctx: &ClientContext,
        token: Option<&str>,
        path_code: &str,
        request: SubmitRequest,
    ) -> Result<SubmitOutcome> {
        let fp = ctx.fingerprint();
        let failure = Failure {
            operation: "submit",
            kind: EventKind::SubmissionFailed,
            ctx,
            fingerprint: &fp,
            invite_code: Some(path_code),
            email: request.email.as_deref(),
        };

        let result = self.run_submit(ctx, &fp, token, path_code, &request).await;
        if let Ok(SubmitOutcome::Deceived) = result {
            self.metrics.observe_request(failure.operation, "deceived");
            return result;
        }
        self.finish(&failure, result)
    }

    async fn run_submit(
        &self,
        ctx: &ClientContext,
        fp: &Fingerprint,
        token: Option<&str>,
        path_code: &str,
        request: &SubmitRequest,
    ) -> Result<SubmitOutcome> {
        self.origins.check(ctx.origin.as_deref(), ctx.referer.as_deref())?;
        let email = normalize_email(request.email.as_deref())?;
        let submitted = self.decoy_values(request)?;
        self.admit(ctx, Tier::Submit, email.as_deref()).await?;

        let decoys: Vec<(&str, Option<&str>)> = submitted
            .iter()
            .map(|(name, value)| (*name, value.as_deref()))
            .collect();
        if let ValidationResult::Invalid(signal) = self.honeypot.validate(&decoys, request.client_elapsed_ms) {
            info!(ip = %ctx.ip, signal = %signal, "Bot submission deceived");
            self.events.record(
                SecurityEvent::new(EventKind::HoneypotTriggered, ctx.ip, signal.to_string())
                    .with_fingerprint(fp)
                    .with_invite_code(path_code)
                    .with_email(email.as_deref()),
            );
            return Ok(SubmitOutcome::Deceived);
        }

        let token = token.ok_or(RsvpError::SessionNotFound)?;
        let session = self.sessions.verify_session(token).await?;
        self.check_binding(&session, ctx, fp, path_code, Some(&request.guest_id))?;

        let submission = self.prepare_submission(&session, request, email).await?;

        let session = self.sessions.begin_submission(token).await?;
        match self.directory.submit(&submission).await {
            Ok(guest) => {
                // The write stands either way
                if let Err(err) = self.sessions.complete_session(&session.token).await {
                    warn!(
                        guest_id = %guest.id,
                        session = token_prefix(&session.token),
                        error = %err,
                        "Failed to close session after RSVP write"
                    );
                }
                info!(
                    guest_id = %guest.id,
                    status = guest.rsvp_status.as_str(),
                    "RSVP recorded"
                );
                Ok(SubmitOutcome::Recorded(guest))
            }
            Err(err) => {
                // Leave the session open so the guest can retry
                if let Err(release) = self.sessions.abort_submission(&session.token).await {
                    debug!(error = %release, "Failed to release submission claim");
                }
                Err(err)
            }
        }
    }

    /// Report remaining session time, refreshing it.
    pub async fn heartbeat(&self, ctx: &ClientContext, session_id: &str) -> Result<SessionStatus> {
        let fp = ctx.fingerprint();
        let failure = Failure {
            operation: "heartbeat",
            kind: EventKind::ValidationFailed,
            ctx,
            fingerprint: &fp,
            invite_code: None,
            email: None,
        };

        let result = self.run_heartbeat(ctx, &fp, session_id).await;
        self.finish(&failure, result)
    }

    async fn run_heartbeat(
        &self,
        ctx: &ClientContext,
        fp: &Fingerprint,
        session_id: &str,
    ) -> Result<SessionStatus> {
        self.admit(ctx, Tier::Heartbeat, None).await?;
        let session = self.sessions.verify_session(session_id).await?;
        self.check_drift(&session, ctx, fp);
        Ok(self.sessions.status_of(&session))
    }

    /// Evict expired limiter, session and suspicious-IP state and refresh
    /// the gauges.
    pub async fn sweep(&self) -> SweepReport {
        let report = SweepReport {
            rate_limit_keys: self.limiter.cleanup().await,
            sessions: self.sessions.sweep().await,
            suspicious_ips: self.events.sweep(),
        };
        self.metrics
            .set_rate_limit_keys(self.limiter.tracked_keys().await);
        self.metrics
            .set_active_sessions(self.sessions.active_sessions().await);
        debug!(?report, "Sweep complete");
        report
    }

    /// Suspicious-IP gate, then the tier's counters.
    async fn admit(&self, ctx: &ClientContext, tier: Tier, email: Option<&str>) -> Result<()> {
        if let Some(remaining) = self.events.suspicious_remaining(ctx.ip) {
            debug!(ip = %ctx.ip, tier = tier.as_str(), "Request from flagged IP");
            self.metrics.observe_rate_limited("suspicious");
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            return Err(RsvpError::RateLimited {
                retry_after_secs: secs.max(1),
            });
        }

        let result = self.limiter.check_tier(tier, ctx.ip, email).await;
        match &result {
            RateLimitResult::Allowed { .. } => Ok(()),
            RateLimitResult::Limited { reason, .. } => {
                self.metrics.observe_rate_limited(reason.scope().as_str());
                info!(ip = %ctx.ip, tier = tier.as_str(), %reason, "Rate limited");
                Err(RsvpError::RateLimited {
                    retry_after_secs: result.retry_after_secs().unwrap_or(1),
                })
            }
        }
    }

    /// The session must belong to the guest named by the request.
    fn check_binding(
        &self,
        session: &RsvpSession,
        ctx: &ClientContext,
        fp: &Fingerprint,
        path_code: &str,
        guest_id: Option<&str>,
    ) -> Result<()> {
        let code_matches = InviteCode::parse(path_code)
            .map(|code| code == session.invite_code)
            .unwrap_or(false);
        let guest_matches = guest_id.map(|id| id == session.guest_id).unwrap_or(true);

        if !(code_matches && guest_matches) {
            return Err(RsvpError::GuestMismatch);
        }
        self.check_drift(session, ctx, fp);
        Ok(())
    }

    fn check_drift(&self, session: &RsvpSession, ctx: &ClientContext, fp: &Fingerprint) {
        if &session.fingerprint != fp {
            debug!(guest_id = %session.guest_id, ip = %ctx.ip, "Fingerprint drift");
            self.events.note(
                SecurityEvent::new(EventKind::SuspiciousActivity, ctx.ip, "fingerprint drift")
                    .with_fingerprint(fp)
                    .with_invite_code(session.invite_code.as_str()),
            );
        }
    }

    /// Submitted decoy fields as text. Any name that is not a configured
    /// decoy is a schema violation.
    fn decoy_values<'a>(&self, request: &'a SubmitRequest) -> Result<Vec<(&'a str, Option<String>)>> {
        request
            .decoys
            .iter()
            .map(|(name, value)| {
                if !self.honeypot.is_decoy(name) {
                    return Err(RsvpError::InvalidInput("unknown field".to_string()));
                }
                let text = match value {
                    Value::Null => None,
                    Value::String(text) => Some(text.clone()),
                    other => Some(other.to_string()),
                };
                Ok((name.as_str(), text))
            })
            .collect()
    }

    async fn prepare_submission(
        &self,
        session: &RsvpSession,
        request: &SubmitRequest,
        email: Option<String>,
    ) -> Result<RsvpSubmission> {
        let meal_options = self.directory.meal_options(&session.guest_id).await?;
        let meal_preference = check_meal(&meal_options, request.meal_choice.as_deref())?;
        let plus_one_meal = check_meal(&meal_options, request.plus_one_meal.as_deref())?;

        let attendance_status = if request.attending {
            AttendanceStatus::Attending
        } else {
            AttendanceStatus::NotAttending
        };

        Ok(RsvpSubmission {
            guest_id: session.guest_id.clone(),
            invite_code: session.invite_code.clone(),
            attendance_status,
            meal_preference,
            dietary_restrictions: self
                .sanitizer
                .clean_opt(request.dietary_restrictions.as_deref()),
            plus_one_name: self.sanitizer.clean_opt(request.plus_one_name.as_deref()),
            plus_one_meal,
            message: self.sanitizer.clean_opt(request.message.as_deref()),
            email,
            submitted_at: self.clock.now(),
        })
    }

    /// Count the outcome, mirror security-relevant failures to the event
    /// log, and pass the result through.
    fn finish<T>(&self, failure: &Failure<'_>, result: Result<T>) -> Result<T> {
        let err = match result {
            Ok(value) => {
                self.metrics.observe_request(failure.operation, "ok");
                return Ok(value);
            }
            Err(err) => err,
        };

        self.metrics.observe_request(failure.operation, err.code());
        if err.is_security_relevant() {
            let kind = match &err {
                RsvpError::RateLimited { .. } => EventKind::RateLimitExceeded,
                RsvpError::GuestMismatch => EventKind::SuspiciousActivity,
                _ => failure.kind,
            };
            let mut event = SecurityEvent::new(kind, failure.ctx.ip, err.to_string())
                .with_fingerprint(failure.fingerprint)
                .with_email(failure.email);
            if let Some(code) = failure.invite_code {
                event = event.with_invite_code(code);
            }
            self.events.record(event);
        } else {
            debug!(operation = failure.operation, error = %err, "Request rejected");
        }
        Err(err)
    }
}

/// A chosen meal must be one of the guest's options, when the directory
/// offers any.
fn check_meal(options: &[MealOption], choice: Option<&str>) -> Result<Option<String>> {
    let Some(choice) = choice.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    if options.is_empty() || options.iter().any(|o| o.id == choice) {
        Ok(Some(choice.to_string()))
    } else {
        Err(RsvpError::InvalidInput("unknown meal choice".to_string()))
    }
}

fn normalize_email(email: Option<&str>) -> Result<Option<String>> {
    let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };
    let well_formed = email.len() <= MAX_EMAIL_LEN
        && !email.chars().any(|c| c.is_whitespace() || c.is_control())
        && matches!(email.split_once('@'), Some((local, domain)) if !local.is_empty() && domain.contains('.'));
    if well_formed {
        Ok(Some(email.to_lowercase()))
    } else {
        Err(RsvpError::InvalidInput("malformed email".to_string()))
    }
}
