// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Guest directory.
//!
//! Guest records live in an external data store. This module defines the
//! narrow interface the RSVP flow needs, a timeout-enforcing wrapper, and
//! an in-memory implementation for development and tests.

use crate::error::{Result, RsvpError};
use crate::invite::InviteCode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Guest repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("guest not found: {0}")]
    GuestNotFound(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid seed data: {0}")]
    Seed(#[from] serde_json::Error),
}

/// RSVP status of a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    #[default]
    Pending,
    Attending,
    NotAttending,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Attending => "attending",
            Self::NotAttending => "not_attending",
        }
    }
}

/// Guest record as owned by the external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub invite_code: InviteCode,
    #[serde(default)]
    pub rsvp_status: AttendanceStatus,
    #[serde(default)]
    pub meal_preference: Option<String>,
    #[serde(default)]
    pub dietary_restrictions: Option<String>,
    #[serde(default)]
    pub plus_one_allowed: bool,
    #[serde(default)]
    pub plus_one_name: Option<String>,
    #[serde(default)]
    pub plus_one_meal: Option<String>,
}

impl Guest {
    pub fn has_responded(&self) -> bool {
        self.rsvp_status != AttendanceStatus::Pending
    }
}

/// A meal a guest can pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealOption {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One historical RSVP answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseVersion {
    pub version: u32,
    pub attendance_status: AttendanceStatus,
    pub meal_preference: Option<String>,
    pub plus_one_name: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// The single write the RSVP flow performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RsvpSubmission {
    pub guest_id: String,
    pub invite_code: InviteCode,
    pub attendance_status: AttendanceStatus,
    pub meal_preference: Option<String>,
    pub dietary_restrictions: Option<String>,
    pub plus_one_name: Option<String>,
    pub plus_one_meal: Option<String>,
    pub message: Option<String>,
    pub email: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// External guest directory.
///
/// `submit_rsvp_response` must be idempotent and transactional on the
/// store side: replaying the same submission leaves the same state.
#[async_trait]
pub trait GuestRepository: Send + Sync {
    async fn find_guest_by_invite_code(
        &self,
        code: &InviteCode,
    ) -> std::result::Result<Option<Guest>, RepositoryError>;

    async fn find_guest(&self, guest_id: &str) -> std::result::Result<Option<Guest>, RepositoryError>;

    async fn meal_options(&self, guest_id: &str) -> std::result::Result<Vec<MealOption>, RepositoryError>;

    /// Most recent versions first.
    async fn response_history(
        &self,
        guest_id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<ResponseVersion>, RepositoryError>;

    async fn submit_rsvp_response(
        &self,
        submission: &RsvpSubmission,
    ) -> std::result::Result<Guest, RepositoryError>;
}

/// Repository handle used by the flow: every call is bounded by a timeout
/// and failures are folded into [`RsvpError::Repository`].
#[derive(Clone)]
pub struct GuestDirectory {
    repository: Arc<dyn GuestRepository>,
    timeout: Duration,
}

impl GuestDirectory {
    pub fn new(repository: Arc<dyn GuestRepository>, timeout: Duration) -> Self {
        Self {
            repository,
            timeout,
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, RepositoryError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(op, error = %err, "Guest repository call failed");
                Err(RsvpError::Repository(err.to_string()))
            }
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "Guest repository call timed out");
                Err(RsvpError::Repository(format!("{} timed out", op)))
            }
        }
    }

    pub async fn find_by_code(&self, code: &InviteCode) -> Result<Option<Guest>> {
        self.bounded("find_guest_by_invite_code", self.repository.find_guest_by_invite_code(code))
            .await
    }

    pub async fn find(&self, guest_id: &str) -> Result<Option<Guest>> {
        self.bounded("find_guest", self.repository.find_guest(guest_id)).await
    }

    pub async fn meal_options(&self, guest_id: &str) -> Result<Vec<MealOption>> {
        self.bounded("meal_options", self.repository.meal_options(guest_id))
            .await
    }

    pub async fn history(&self, guest_id: &str, limit: usize) -> Result<Vec<ResponseVersion>> {
        self.bounded("response_history", self.repository.response_history(guest_id, limit))
            .await
    }

    pub async fn submit(&self, submission: &RsvpSubmission) -> Result<Guest> {
        self.bounded("submit_rsvp_response", self.repository.submit_rsvp_response(submission))
            .await
    }
}

/// Seed document for [`InMemoryGuestRepository`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSeed {
    #[serde(default)]
    pub guests: Vec<Guest>,
    #[serde(default)]
    pub meal_options: Vec<MealOption>,
}

#[derive(Default)]
struct Directory {
    guests: HashMap<String, Guest>,
    by_code: HashMap<InviteCode, String>,
    history: HashMap<String, Vec<ResponseVersion>>,
    submissions: Vec<RsvpSubmission>,
}

/// In-memory guest directory.
///
/// Suitable for development and tests. It also counts lookups and can be
/// told to fail or stall writes so callers can be tested against a
/// misbehaving store.
#[derive(Default)]
pub struct InMemoryGuestRepository {
    directory: RwLock<Directory>,
    meal_options: Vec<MealOption>,
    lookups: AtomicUsize,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
}

impl InMemoryGuestRepository {
    pub fn new(guests: Vec<Guest>, meal_options: Vec<MealOption>) -> Self {
        let mut directory = Directory::default();
        for guest in guests {
            directory
                .by_code
                .insert(guest.invite_code.clone(), guest.id.clone());
            directory.guests.insert(guest.id.clone(), guest);
        }
        Self {
            directory: RwLock::new(directory),
            meal_options,
            ..Default::default()
        }
    }

    /// Load guests and meal options from a JSON seed file.
    pub fn from_json_file(path: &Path) -> std::result::Result<Self, RepositoryError> {
        let raw = std::fs::read_to_string(path)?;
        let seed: GuestSeed = serde_json::from_str(&raw)?;
        Ok(Self::new(seed.guests, seed.meal_options))
    }

    /// Number of invite-code lookups served.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Every write received, in order.
    pub async fn submissions(&self) -> Vec<RsvpSubmission> {
        self.directory.read().await.submissions.clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl GuestRepository for InMemoryGuestRepository {
    async fn find_guest_by_invite_code(
        &self,
        code: &InviteCode,
    ) -> std::result::Result<Option<Guest>, RepositoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let directory = self.directory.read().await;
        Ok(directory
            .by_code
            .get(code)
            .and_then(|id| directory.guests.get(id))
            .cloned())
    }

    async fn find_guest(&self, guest_id: &str) -> std::result::Result<Option<Guest>, RepositoryError> {
        Ok(self.directory.read().await.guests.get(guest_id).cloned())
    }

    async fn meal_options(&self, _guest_id: &str) -> std::result::Result<Vec<MealOption>, RepositoryError> {
        Ok(self.meal_options.clone())
    }

    async fn response_history(
        &self,
        guest_id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<ResponseVersion>, RepositoryError> {
        let directory = self.directory.read().await;
        Ok(directory
            .history
            .get(guest_id)
            .map(|versions| versions.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn submit_rsvp_response(
        &self,
        submission: &RsvpSubmission,
    ) -> std::result::Result<Guest, RepositoryError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Backend("write rejected".to_string()));
        }

        let mut directory = self.directory.write().await;
        let guest = directory
            .guests
            .get_mut(&submission.guest_id)
            .ok_or_else(|| RepositoryError::GuestNotFound(submission.guest_id.clone()))?;

        guest.rsvp_status = submission.attendance_status;
        guest.meal_preference = submission.meal_preference.clone();
        guest.dietary_restrictions = submission.dietary_restrictions.clone();
        if guest.plus_one_allowed {
            guest.plus_one_name = submission.plus_one_name.clone();
            guest.plus_one_meal = submission.plus_one_meal.clone();
        }
        if submission.email.is_some() {
            guest.email = submission.email.clone();
        }
        let updated = guest.clone();

        let versions = directory
            .history
            .entry(submission.guest_id.clone())
            .or_default();
        let version = versions.len() as u32 + 1;
        versions.push(ResponseVersion {
            version,
            attendance_status: submission.attendance_status,
            meal_preference: submission.meal_preference.clone(),
            plus_one_name: submission.plus_one_name.clone(),
            submitted_at: submission.submitted_at,
        });
        directory.submissions.push(submission.clone());

        debug!(guest_id = %submission.guest_id, version, "RSVP stored");
        Ok(updated)
    }
}
