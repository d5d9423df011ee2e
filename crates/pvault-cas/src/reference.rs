//! Vault reference record and its textual wire form.
//!
//! The current wire form is a compact JSON object carrying all four fields:
//!
//! ```text
//! {"uri":"promptvault://fs/<trace>/<span>/gen_ai.prompt","checksum":"9f86...","encrypted":false,"size_bytes":42}
//! ```
//!
//! References written before checksums existed are bare locators such as
//! `vault://9f86...`. They still decode, with an empty checksum and a size of
//! [`UNKNOWN_SIZE`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Result, VaultError};

/// `size_bytes` of a legacy reference.
pub const UNKNOWN_SIZE: i64 = -1;

/// Handle to a vaulted payload, embedded back into the telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Backend-specific locator (`promptvault://fs/...`, `vault://...`)
    pub uri: String,
    /// Lowercase hex SHA-256 of the payload; empty for legacy references
    pub checksum: String,
    /// Informational only
    pub encrypted: bool,
    /// Payload length, or [`UNKNOWN_SIZE`]
    pub size_bytes: i64,
}

impl Reference {
    /// Reference decoded from a bare pre-checksum locator.
    pub fn legacy(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            checksum: String::new(),
            encrypted: false,
            size_bytes: UNKNOWN_SIZE,
        }
    }

    /// An empty checksum means "verification unavailable", not corruption.
    pub fn is_verifiable(&self) -> bool {
        !self.checksum.is_empty()
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Inverse of [`Reference::encode`]; also accepts the legacy bare-locator form.
    pub fn decode(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim();

        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed)
                .map_err(|e| VaultError::MalformedReference(format!("{}: {}", e, trimmed)));
        }

        if is_bare_locator(trimmed) {
            return Ok(Self::legacy(trimmed));
        }

        Err(VaultError::MalformedReference(format!(
            "not a structured reference or locator: {:?}",
            encoded
        )))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl FromStr for Reference {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

/// `<scheme>://<rest>` with an RFC 3986 style scheme and no whitespace.
fn is_bare_locator(s: &str) -> bool {
    let Some((scheme, rest)) = s.split_once("://") else {
        return false;
    };

    let mut chars = scheme.chars();
    let scheme_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    scheme_ok && !rest.is_empty() && !s.chars().any(char::is_whitespace)
}
