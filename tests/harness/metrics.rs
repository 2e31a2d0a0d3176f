// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Metrics collection for attack simulation results.

use rsvp_guard::{RsvpError, SubmitOutcome};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Collects metrics during attack simulation.
#[derive(Debug, Default)]
pub struct AttackMetrics {
    /// Start time of the attack
    start_time: Option<Instant>,
    /// End time of the attack
    end_time: Option<Instant>,
    /// Count of requests by outcome
    outcomes: HashMap<Outcome, usize>,
    /// Count of requests by IP
    requests_per_ip: HashMap<IpAddr, usize>,
    /// Latency samples (microseconds)
    latencies: Vec<u64>,
}

/// Possible outcomes for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Reached its goal (session opened, RSVP recorded)
    Allowed,
    /// Answered with a fake success
    Deceived,
    InvalidCode,
    RateLimited,
    SessionRejected,
    Forbidden,
    Other,
}

impl Outcome {
    pub fn from_error(err: &RsvpError) -> Self {
        match err {
            RsvpError::InvalidCode => Outcome::InvalidCode,
            RsvpError::RateLimited { .. } => Outcome::RateLimited,
            RsvpError::SessionExpired | RsvpError::SessionNotFound | RsvpError::InvalidSession => {
                Outcome::SessionRejected
            }
            RsvpError::InvalidOrigin | RsvpError::GuestMismatch => Outcome::Forbidden,
            _ => Outcome::Other,
        }
    }

    pub fn from_validate<T>(result: &Result<T, RsvpError>) -> Self {
        match result {
            Ok(_) => Outcome::Allowed,
            Err(err) => Self::from_error(err),
        }
    }

    pub fn from_submit(result: &Result<SubmitOutcome, RsvpError>) -> Self {
        match result {
            Ok(SubmitOutcome::Recorded(_)) => Outcome::Allowed,
            Ok(SubmitOutcome::Deceived) => Outcome::Deceived,
            Err(err) => Self::from_error(err),
        }
    }
}

impl AttackMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of an attack.
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Mark the end of an attack.
    pub fn finish(&mut self) {
        self.end_time = Some(Instant::now());
    }

    /// Record a request outcome.
    pub fn record(&mut self, outcome: Outcome, ip: IpAddr, latency: Duration) {
        *self.outcomes.entry(outcome).or_insert(0) += 1;
        *self.requests_per_ip.entry(ip).or_insert(0) += 1;
        self.latencies.push(latency.as_micros() as u64);
    }

    /// Get total request count.
    pub fn total_requests(&self) -> usize {
        self.outcomes.values().sum()
    }

    /// Get count for a specific outcome.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    /// Get duration of the attack.
    pub fn duration(&self) -> Duration {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Requests that got any answer other than a real success.
    pub fn block_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        let allowed = self.count(Outcome::Allowed);
        (total - allowed) as f64 / total as f64
    }

    /// Get p99 latency in microseconds.
    pub fn p99_latency_us(&self) -> u64 {
        if self.latencies.is_empty() {
            return 0;
        }
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();
        let idx = (sorted.len() as f64 * 0.99) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    /// Get number of unique IPs that made requests.
    pub fn unique_ips(&self) -> usize {
        self.requests_per_ip.len()
    }

    /// Generate a summary report.
    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            total_requests: self.total_requests(),
            allowed: self.count(Outcome::Allowed),
            deceived: self.count(Outcome::Deceived),
            invalid_code: self.count(Outcome::InvalidCode),
            rate_limited: self.count(Outcome::RateLimited),
            duration_ms: self.duration().as_millis() as u64,
            block_rate: self.block_rate(),
            p99_latency_us: self.p99_latency_us(),
            unique_ips: self.unique_ips(),
        }
    }
}

/// Summary report of attack metrics.
#[derive(Debug, Clone)]
pub struct MetricsReport {
    pub total_requests: usize,
    pub allowed: usize,
    pub deceived: usize,
    pub invalid_code: usize,
    pub rate_limited: usize,
    pub duration_ms: u64,
    pub block_rate: f64,
    pub p99_latency_us: u64,
    pub unique_ips: usize,
}

impl std::fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Attack Metrics Report ===")?;
        writeln!(f, "Duration:          {} ms", self.duration_ms)?;
        writeln!(f, "Total Requests:    {}", self.total_requests)?;
        writeln!(f)?;
        writeln!(f, "--- Outcomes ---")?;
        writeln!(f, "Allowed:           {}", self.allowed)?;
        writeln!(f, "Deceived:          {}", self.deceived)?;
        writeln!(f, "Invalid Code:      {}", self.invalid_code)?;
        writeln!(f, "Rate Limited:      {}", self.rate_limited)?;
        writeln!(f, "Block Rate:        {:.1}%", self.block_rate * 100.0)?;
        writeln!(f)?;
        writeln!(f, "P99 Latency:       {} us", self.p99_latency_us)?;
        writeln!(f, "Unique IPs:        {}", self.unique_ips)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        let mut metrics = AttackMetrics::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        metrics.start();

        metrics.record(Outcome::InvalidCode, ip, Duration::from_micros(100));
        metrics.record(Outcome::InvalidCode, ip, Duration::from_micros(150));
        metrics.record(Outcome::RateLimited, ip, Duration::from_micros(50));

        metrics.finish();

        assert_eq!(metrics.total_requests(), 3);
        assert_eq!(metrics.count(Outcome::InvalidCode), 2);
        assert_eq!(metrics.unique_ips(), 1);
        assert!((metrics.block_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(
            Outcome::from_error(&RsvpError::RateLimited { retry_after_secs: 1 }),
            Outcome::RateLimited
        );
        assert_eq!(
            Outcome::from_submit(&Ok(SubmitOutcome::Deceived)),
            Outcome::Deceived
        );
    }
}
