// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Free-text sanitization for guest-entered fields.
//!
//! Dietary notes, plus-one names and messages end up on pages other people
//! render, so markup that can execute is removed before they are stored:
//! - `<script>` / `<iframe>` blocks and stray opening tags
//! - `javascript:` URIs
//! - inline `on*=` event handlers

use crate::config::SanitizeConfig;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

fn script_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<\s*(script|iframe)\b.*?<\s*/\s*(script|iframe)\s*>")
            .expect("static regex")
    })
}

fn stray_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<\s*/?\s*(script|iframe)\b[^>]*>?").expect("static regex")
    })
}

fn javascript_uri() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)javascript\s*:").expect("static regex"))
}

fn event_handler() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bon[a-z]+\s*=").expect("static regex"))
}

/// One round of every pattern. `None` when nothing matched.
fn strip_pass(text: &str) -> Option<String> {
    let patterns = [script_block(), stray_tag(), javascript_uri(), event_handler()];
    let mut changed = false;
    let mut current = text.to_string();
    for pattern in patterns {
        if let Cow::Owned(next) = pattern.replace_all(&current, "") {
            changed = true;
            current = next;
        }
    }
    changed.then_some(current)
}

/// Strips executable markup and bounds length.
#[derive(Debug, Clone)]
pub struct TextSanitizer {
    max_len: usize,
}

impl TextSanitizer {
    pub fn new(config: &SanitizeConfig) -> Self {
        Self {
            max_len: config.max_text_len,
        }
    }

    /// Sanitize one value. The result is trimmed and at most `max_len`
    /// characters long.
    ///
    /// Passes repeat until nothing more is removed, so markup split around
    /// a stripped token (`<scr<script>ipt>`) cannot reassemble.
    pub fn clean(&self, input: &str) -> String {
        let mut text = input.to_string();
        // Every pass that changes the text makes it shorter
        while let Some(stripped) = strip_pass(&text) {
            text = stripped;
        }
        text.trim().chars().take(self.max_len).collect()
    }

    /// Sanitize an optional value. Empty results become `None`.
    pub fn clean_opt(&self, input: Option<&str>) -> Option<String> {
        input.map(|s| self.clean(s)).filter(|s| !s.is_empty())
    }
}
