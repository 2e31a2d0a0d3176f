// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test harness for RSVP guard attack simulation.
//!
//! This module provides a seeded flow, client generators and outcome
//! counters for simulating enumeration and bot traffic against the
//! public RSVP operations.

#![allow(dead_code)]

pub mod attacks;
pub mod fixtures;
pub mod generators;
pub mod metrics;
