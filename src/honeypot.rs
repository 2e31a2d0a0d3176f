// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Bot detection for RSVP submissions.
//!
//! Two cheap signals:
//! - Decoy form fields hidden from humans (`website`, `company`)
//! - Render-to-submit time below what a person needs to fill the form
//!
//! A failed check is not an error. The caller answers with a normal
//! looking success and persists nothing.

use crate::config::HoneypotConfig;
use thiserror::Error;
use tracing::debug;

/// Why a submission looks automated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BotSignal {
    #[error("honeypot triggered")]
    HoneypotTriggered { field: String },

    #[error("submitted too quickly")]
    TooFast { elapsed_ms: u64, min_ms: u64 },
}

/// Result of validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Looks human
    Valid,
    /// Looks automated
    Invalid(BotSignal),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn error(&self) -> Option<&BotSignal> {
        match self {
            ValidationResult::Valid => None,
            ValidationResult::Invalid(e) => Some(e),
        }
    }
}

/// Honeypot and timing validator.
pub struct HoneypotValidator {
    config: HoneypotConfig,
}

impl HoneypotValidator {
    pub fn new(config: HoneypotConfig) -> Self {
        Self { config }
    }

    /// Check the decoy fields.
    ///
    /// `fields` pairs a form field name with its submitted value. Names not
    /// in the configured decoy list are ignored.
    pub fn validate_decoys(&self, fields: &[(&str, Option<&str>)]) -> ValidationResult {
        for (name, value) in fields {
            let filled = value.map(|v| !v.trim().is_empty()).unwrap_or(false);
            if filled && self.is_decoy(name) {
                debug!(field = %name, "Decoy field filled");
                return ValidationResult::Invalid(BotSignal::HoneypotTriggered {
                    field: name.to_string(),
                });
            }
        }
        ValidationResult::Valid
    }

    /// Check the client-reported render-to-submit time.
    pub fn validate_timing(&self, client_elapsed_ms: u64) -> ValidationResult {
        if !self.config.enforce_timing || client_elapsed_ms >= self.config.min_elapsed_ms {
            return ValidationResult::Valid;
        }
        debug!(
            elapsed_ms = client_elapsed_ms,
            min_ms = self.config.min_elapsed_ms,
            "Submission faster than a human"
        );
        ValidationResult::Invalid(BotSignal::TooFast {
            elapsed_ms: client_elapsed_ms,
            min_ms: self.config.min_elapsed_ms,
        })
    }

    /// Validate a submission. Decoys are checked before timing.
    pub fn validate(&self, fields: &[(&str, Option<&str>)], client_elapsed_ms: u64) -> ValidationResult {
        let decoys = self.validate_decoys(fields);
        if !decoys.is_valid() {
            return decoys;
        }
        self.validate_timing(client_elapsed_ms)
    }

    /// Whether `name` is a configured decoy field.
    pub fn is_decoy(&self, name: &str) -> bool {
        self.config
            .decoy_fields
            .iter()
            .any(|decoy| decoy.eq_ignore_ascii_case(name))
    }
}
