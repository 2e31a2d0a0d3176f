// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Security event log.
//!
//! Append-only audit trail of validation failures, rate-limit trips,
//! honeypot hits and suspicious mismatches.
//!
//! Recording is fire-and-forget: events are pushed onto a bounded channel
//! and written to the configured sinks by a background task. A full queue
//! drops the event; the request that produced it is never slowed down or
//! failed by logging.
//!
//! Honeypot hits and suspicious activity also flag the actor IP for a
//! while. The flag is set synchronously so the very next request from
//! that IP already sees it.

use crate::clock::Clock;
use crate::config::EventLogConfig;
use crate::fingerprint::Fingerprint;
use crate::metrics::Metrics;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Longest invite-code attempt kept in an event.
const MAX_CODE_ECHO: usize = 16;

/// Errors from event sinks.
#[derive(Debug, Error)]
pub enum EventSinkError {
    #[error("sink error: {0}")]
    Sink(String),
}

/// Kind of security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ValidationFailed,
    SubmissionFailed,
    HoneypotTriggered,
    RateLimitExceeded,
    SuspiciousActivity,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "validation_failed",
            Self::SubmissionFailed => "submission_failed",
            Self::HoneypotTriggered => "honeypot_triggered",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::SuspiciousActivity => "suspicious_activity",
        }
    }

    /// Kinds that flag the actor IP.
    pub fn flags_actor(&self) -> bool {
        matches!(self, Self::HoneypotTriggered | Self::SuspiciousActivity)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One security event. Stamped when recorded and never changed after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub ip: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub reason: String,
}

impl SecurityEvent {
    pub fn new(kind: EventKind, ip: IpAddr, reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            ip,
            fingerprint: None,
            invite_code: None,
            email: None,
            reason: reason.into(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: &Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint.clone());
        self
    }

    /// Attach the code as submitted. Attempts are attacker input, so only
    /// a bounded, printable prefix is kept.
    pub fn with_invite_code(mut self, code: &str) -> Self {
        let echoed: String = code
            .chars()
            .filter(|c| !c.is_control())
            .take(MAX_CODE_ECHO)
            .collect();
        self.invite_code = Some(echoed);
        self
    }

    pub fn with_email(mut self, email: Option<&str>) -> Self {
        self.email = email.map(|e| e.trim().to_lowercase());
        self
    }
}

/// Destination for recorded events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write(&self, event: &SecurityEvent) -> Result<(), EventSinkError>;
}

/// Writes each event as a structured `tracing` record on the `security`
/// target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn write(&self, event: &SecurityEvent) -> Result<(), EventSinkError> {
        warn!(
            target: "security",
            kind = %event.kind,
            ip = %event.ip,
            fingerprint = event.fingerprint.as_ref().map(|f| f.as_str()),
            invite_code = event.invite_code.as_deref(),
            email = event.email.as_deref(),
            reason = %event.reason,
            timestamp = %event.timestamp,
            "Security event"
        );
        Ok(())
    }
}

/// Keeps the most recent events in memory for review.
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    events: RwLock<VecDeque<SecurityEvent>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: RwLock::new(VecDeque::new()),
        }
    }

    /// Most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        events.iter().rev().take(limit).cloned().collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        events.iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn write(&self, event: &SecurityEvent) -> Result<(), EventSinkError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

/// IPs flagged by honeypot hits or suspicious activity, with the time the
/// flag lapses.
#[derive(Debug, Default)]
pub struct SuspiciousIps {
    flagged: RwLock<HashMap<IpAddr, DateTime<Utc>>>,
}

impl SuspiciousIps {
    pub fn flag(&self, ip: IpAddr, until: DateTime<Utc>) {
        let mut flagged = self.flagged.write().unwrap_or_else(|e| e.into_inner());
        let entry = flagged.entry(ip).or_insert(until);
        if *entry < until {
            *entry = until;
        }
    }

    /// Time left on the flag, if any.
    pub fn remaining(&self, ip: IpAddr, now: DateTime<Utc>) -> Option<ChronoDuration> {
        let flagged = self.flagged.read().unwrap_or_else(|e| e.into_inner());
        flagged
            .get(&ip)
            .filter(|until| **until > now)
            .map(|until| *until - now)
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut flagged = self.flagged.write().unwrap_or_else(|e| e.into_inner());
        let before = flagged.len();
        flagged.retain(|_, until| *until > now);
        before - flagged.len()
    }
}

/// Handle used by the request path to record events.
pub struct SecurityEventLog {
    sender: mpsc::Sender<SecurityEvent>,
    suspicious: SuspiciousIps,
    suspicion_window: ChronoDuration,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    dropped: AtomicU64,
}

impl SecurityEventLog {
    /// Start the writer task and return the recording handle.
    ///
    /// The writer exits once the handle is dropped and the queue drained.
    pub fn spawn(
        config: &EventLogConfig,
        sinks: Vec<Arc<dyn EventSink>>,
        suspicion_window: ChronoDuration,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let writer = tokio::spawn(run_writer(receiver, sinks));
        let log = Self {
            sender,
            suspicious: SuspiciousIps::default(),
            suspicion_window,
            clock,
            metrics,
            dropped: AtomicU64::new(0),
        };
        (log, writer)
    }

    /// Record an event. Never fails and never waits.
    pub fn record(&self, event: SecurityEvent) {
        let flag = event.kind.flags_actor();
        self.write(event, flag);
    }

    /// Record an event without flagging the actor, for signals too weak
    /// to block on (a guest changing networks mid-session).
    pub fn note(&self, event: SecurityEvent) {
        self.write(event, false);
    }

    fn write(&self, mut event: SecurityEvent, flag_actor: bool) {
        event.timestamp = self.clock.now();

        if flag_actor {
            self.suspicious
                .flag(event.ip, event.timestamp + self.suspicion_window);
        }
        self.metrics.observe_security_event(event.kind.as_str());

        if let Err(err) = self.sender.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.metrics.observe_event_dropped();
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            warn!(reason, "Security event dropped");
        }
    }

    /// Remaining time on the IP's suspicious flag.
    pub fn suspicious_remaining(&self, ip: IpAddr) -> Option<Duration> {
        self.suspicious
            .remaining(ip, self.clock.now())
            .and_then(|d| d.to_std().ok())
    }

    /// Drop lapsed suspicious flags.
    pub fn sweep(&self) -> usize {
        self.suspicious.sweep(self.clock.now())
    }

    /// Events dropped since start.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn run_writer(mut receiver: mpsc::Receiver<SecurityEvent>, sinks: Vec<Arc<dyn EventSink>>) {
    while let Some(event) = receiver.recv().await {
        for sink in &sinks {
            if let Err(err) = sink.write(&event).await {
                warn!(error = %err, kind = %event.kind, "Security event sink failed");
            }
        }
    }
    debug!("Security event writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn write(&self, _event: &SecurityEvent) -> Result<(), EventSinkError> {
            Err(EventSinkError::Sink("disk full".to_string()))
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn spawn_log(
        capacity: usize,
        sinks: Vec<Arc<dyn EventSink>>,
        clock: MockClock,
    ) -> (SecurityEventLog, JoinHandle<()>) {
        SecurityEventLog::spawn(
            &EventLogConfig {
                queue_capacity: capacity,
                memory_capacity: 100,
            },
            sinks,
            ChronoDuration::hours(1),
            Arc::new(clock),
            Metrics::new().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_events_reach_sinks_in_order() {
        let memory = Arc::new(MemorySink::new(10));
        let (log, writer) = spawn_log(16, vec![memory.clone(), Arc::new(FailingSink)], MockClock::default());

        log.record(SecurityEvent::new(EventKind::ValidationFailed, ip("10.0.0.1"), "invalid code").with_invite_code("ABCDEF"));
        log.record(SecurityEvent::new(EventKind::RateLimitExceeded, ip("10.0.0.1"), "ip"));
        drop(log);
        writer.await.unwrap();

        let recent = memory.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, EventKind::RateLimitExceeded);
        assert_eq!(recent[1].invite_code.as_deref(), Some("ABCDEF"));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (log, _writer) = spawn_log(1, vec![], MockClock::default());
        for _ in 0..100 {
            log.record(SecurityEvent::new(EventKind::ValidationFailed, ip("10.0.0.2"), "x"));
        }
        // The writer may drain some of them concurrently
        assert!(log.dropped() > 0);
    }

    #[tokio::test]
    async fn test_honeypot_flags_ip_for_window() {
        let clock = MockClock::default();
        let (log, _writer) = spawn_log(16, vec![], clock.clone());
        let bot = ip("198.51.100.4");

        log.record(SecurityEvent::new(EventKind::ValidationFailed, bot, "x"));
        assert!(log.suspicious_remaining(bot).is_none());

        log.record(SecurityEvent::new(EventKind::HoneypotTriggered, bot, "honeypot triggered"));
        assert_eq!(log.suspicious_remaining(bot), Some(Duration::from_secs(3600)));

        let roaming = ip("198.51.100.5");
        log.note(SecurityEvent::new(EventKind::SuspiciousActivity, roaming, "fingerprint drift"));
        assert!(log.suspicious_remaining(roaming).is_none());

        clock.advance(ChronoDuration::minutes(61));
        assert!(log.suspicious_remaining(bot).is_none());
        assert_eq!(log.sweep(), 1);
    }

    #[tokio::test]
    async fn test_memory_sink_is_bounded() {
        let sink = MemorySink::new(2);
        for i in 0..5 {
            sink.write(&SecurityEvent::new(EventKind::SubmissionFailed, ip("10.0.0.3"), format!("{}", i)))
                .await
                .unwrap();
        }
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.recent(1)[0].reason, "4");
    }

    #[test]
    fn test_code_echo_is_bounded() {
        let event = SecurityEvent::new(EventKind::ValidationFailed, ip("10.0.0.1"), "x")
            .with_invite_code(&"A\u{0}".repeat(100));
        assert_eq!(event.invite_code.unwrap().len(), MAX_CODE_ECHO);
    }
}
