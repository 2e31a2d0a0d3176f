// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request fingerprinting.
//!
//! A fingerprint is a SHA3-256 digest over the client IP, user agent and
//! `Accept-Language` header. It correlates repeated requests from the same
//! client without keeping the raw values around.
//!
//! Each part is hashed as a big-endian `u64` length followed by its raw
//! bytes, and the language carries a presence byte, so distinct inputs
//! never share a pre-image.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::net::IpAddr;

/// Domain separation prefix for the digest.
const DOMAIN: &[u8] = b"rsvp-fingerprint-v1";

/// Opaque, hex-encoded client fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild from a stored or cookie value. Anything that is not a
    /// 64-character hex string is rejected.
    pub fn from_hex(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(value.to_ascii_lowercase()))
        } else {
            None
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint for a client.
pub fn fingerprint(ip: IpAddr, user_agent: &str, accept_language: Option<&str>) -> Fingerprint {
    let mut hasher = Sha3_256::new();
    hasher.update(DOMAIN);
    update_field(&mut hasher, ip.to_string().as_bytes());
    update_field(&mut hasher, user_agent.as_bytes());
    match accept_language {
        Some(language) => {
            hasher.update([1u8]);
            update_field(&mut hasher, language.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    Fingerprint(hex::encode(hasher.finalize()))
}

fn update_field(hasher: &mut Sha3_256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}
