// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Attack simulation patterns for security testing.

/// Invite-code enumeration pattern.
#[derive(Debug, Clone)]
pub struct AttackConfig {
    /// Total number of validation attempts
    pub total_requests: usize,
    /// Number of unique IPs to rotate through
    pub unique_ips: usize,
    /// Email sent with every attempt, if any
    pub email: Option<&'static str>,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            total_requests: 100,
            unique_ips: 1,
            email: None,
        }
    }
}

/// Predefined attack patterns.
impl AttackConfig {
    /// Single IP walks the code space.
    pub fn single_ip_enumeration() -> Self {
        Self {
            total_requests: 100,
            unique_ips: 1,
            ..Default::default()
        }
    }

    /// Botnet: every attempt from a fresh IP.
    pub fn distributed_enumeration() -> Self {
        Self {
            total_requests: 200,
            unique_ips: 200,
            ..Default::default()
        }
    }

    /// Rotating IPs but a fixed email, as a scripted form-filler does.
    pub fn email_pinned_enumeration() -> Self {
        Self {
            total_requests: 30,
            unique_ips: 30,
            email: Some("bot@spam.example"),
        }
    }
}

/// Expected outcomes under the default validate tier
/// (5/hour/IP, 10/day/email, 100/hour global).
pub struct AttackExpectations {
    /// Attempts that reach the directory and fail as unknown codes
    pub invalid_code: usize,
    /// Attempts refused by the limiter
    pub rate_limited: usize,
    /// Description of expected behavior
    pub description: &'static str,
}

impl AttackConfig {
    /// Get expected outcomes for this attack pattern.
    pub fn expectations(&self) -> AttackExpectations {
        let per_ip_budget = 5;
        let email_budget = 10;
        let global_budget = 100;

        let per_ip_attempts = self.total_requests.div_ceil(self.unique_ips);
        let ip_allowed = self.unique_ips * per_ip_attempts.min(per_ip_budget);
        let mut reached = ip_allowed.min(self.total_requests);
        if self.email.is_some() {
            reached = reached.min(email_budget);
        }
        reached = reached.min(global_budget);

        let description = if self.email.is_some() {
            "Email scope caps attempts regardless of IP rotation"
        } else if self.unique_ips == 1 {
            "Single IP is locked out after its hourly budget"
        } else {
            "Global ceiling caps a distributed attack"
        };

        AttackExpectations {
            invalid_code: reached,
            rate_limited: self.total_requests - reached,
            description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expectations() {
        let single = AttackConfig::single_ip_enumeration().expectations();
        assert_eq!((single.invalid_code, single.rate_limited), (5, 95));

        let distributed = AttackConfig::distributed_enumeration().expectations();
        assert_eq!((distributed.invalid_code, distributed.rate_limited), (100, 100));

        let pinned = AttackConfig::email_pinned_enumeration().expectations();
        assert_eq!((pinned.invalid_code, pinned.rate_limited), (10, 20));
    }
}
