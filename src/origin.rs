// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Origin allow-list for mutating requests.

use crate::config::OriginConfig;
use crate::error::{Result, RsvpError};
use tracing::debug;
use url::Url;

/// Checks `Origin` (falling back to `Referer`) against the allow-list.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    require_header: bool,
}

impl OriginPolicy {
    pub fn new(config: &OriginConfig) -> Self {
        let allowed = config
            .allowed
            .iter()
            .filter_map(|raw| normalize(raw))
            .collect();
        Self {
            allowed,
            require_header: config.require_header,
        }
    }

    /// Accept or reject a request by its `Origin` / `Referer` headers.
    ///
    /// A request carrying neither is accepted unless `require_header` is
    /// set: older browsers omit both on same-origin form posts.
    pub fn check(&self, origin: Option<&str>, referer: Option<&str>) -> Result<()> {
        let claimed = match (origin, referer) {
            (Some(origin), _) => origin,
            (None, Some(referer)) => referer,
            (None, None) if self.require_header => {
                debug!("Request carries neither Origin nor Referer");
                return Err(RsvpError::InvalidOrigin);
            }
            (None, None) => return Ok(()),
        };

        match normalize(claimed) {
            Some(origin) if self.allowed.contains(&origin) => Ok(()),
            other => {
                debug!(origin = ?other, "Origin not allowed");
                Err(RsvpError::InvalidOrigin)
            }
        }
    }
}

/// `scheme://host[:port]` in lower case, or `None` for opaque origins
/// (`null`, `file:`, `data:`) and unparsable input.
fn normalize(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let origin = url.origin();
    origin
        .is_tuple()
        .then(|| origin.ascii_serialization().to_ascii_lowercase())
}
