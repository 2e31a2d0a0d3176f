// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! RSVP Guard
//!
//! Access control and anti-abuse for a public "enter your invite code"
//! RSVP flow:
//!
//! - Fixed-window rate limiting per IP, per email and globally, with
//!   escalating lockouts
//! - Request fingerprinting
//! - Honeypot fields and minimum-interaction timing
//! - Short-lived sessions binding a validated invite code to one guest
//! - An append-only security event log that feeds adaptive blocking

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod flow;
pub mod handlers;
pub mod honeypot;
pub mod invite;
pub mod limiter;
pub mod metrics;
pub mod origin;
pub mod repository;
pub mod sanitize;
pub mod session;

pub use config::Config;
pub use error::{Result, RsvpError};
pub use flow::{ClientContext, RsvpFlow, SubmitOutcome};
pub use limiter::{RateLimitResult, RateLimiter};
pub use repository::{GuestRepository, InMemoryGuestRepository};
pub use session::SessionManager;
