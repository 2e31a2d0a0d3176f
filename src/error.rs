// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the RSVP flow.
//!
//! Messages are deliberately generic: what reaches a client must not tell
//! an enumerator anything beyond "no".

use thiserror::Error;

/// Failure of one of the public RSVP operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RsvpError {
    #[error("Request origin not allowed")]
    InvalidOrigin,

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// Covers both malformed and unknown codes.
    #[error("Invalid invite code")]
    InvalidCode,

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("Session expired")]
    SessionExpired,

    #[error("Session not found")]
    SessionNotFound,

    /// Token present but unusable, e.g. already completed.
    #[error("Invalid session")]
    InvalidSession,

    #[error("Session does not match this guest")]
    GuestMismatch,

    #[error("Guest directory unavailable")]
    Repository(String),

    #[error("Internal state unavailable")]
    Store(String),
}

impl RsvpError {
    /// Stable machine-readable code used in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidOrigin => "INVALID_ORIGIN",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidCode => "INVALID_CODE",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::InvalidSession => "INVALID_SESSION",
            Self::GuestMismatch => "GUEST_MISMATCH",
            Self::Repository(_) => "REPOSITORY_ERROR",
            Self::Store(_) => "INTERNAL_ERROR",
        }
    }

    /// Message shown to clients. Never includes internal detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidInput(detail) => format!("Invalid request: {}", detail),
            Self::Repository(_) => "Unable to process your RSVP right now".to_string(),
            Self::Store(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the failure is mirrored to the security event log.
    /// Schema and origin failures are filtered out before any guest state
    /// is touched and are only traced.
    pub fn is_security_relevant(&self) -> bool {
        !matches!(self, Self::InvalidInput(_) | Self::InvalidOrigin)
    }
}

/// Failure of a backing state store (rate-limit counters, sessions).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for RsvpError {
    fn from(err: StoreError) -> Self {
        RsvpError::Store(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RsvpError>;
