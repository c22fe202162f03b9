//! Captured browser authentication state
//!
//! The on-disk shape follows the Playwright storage-state JSON document:
//! cookies plus per-origin localStorage, with an optional `meta` block used
//! for diagnostics and staleness heuristics.

use serde::{Deserialize, Serialize};

/// Expiry value used by the browser for session-lifetime cookies.
pub const SESSION_COOKIE_EXPIRES: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// A single cookie record, field names matching the browser's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,

    /// Expiry as epoch seconds; `-1` for session cookies.
    #[serde(default = "default_expires")]
    pub expires: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
}

fn default_expires() -> f64 {
    SESSION_COOKIE_EXPIRES
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStorageEntry {
    pub name: String,
    pub value: String,
}

/// localStorage contents for one origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
    pub origin: String,

    #[serde(default)]
    pub local_storage: Vec<LocalStorageEntry>,
}

/// Diagnostic metadata recorded when a session is captured. Not used for
/// correctness decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub environment: String,
    pub created_at: String,
    pub dominio: String,
}

/// A complete captured session. Either fully present on disk as valid JSON
/// or treated as absent; never partially written (the store rewrites the
/// whole document through a rename).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default)]
    pub cookies: Vec<Cookie>,

    #[serde(default)]
    pub origins: Vec<OriginState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<SessionMeta>,
}

impl StoredSession {
    /// Look up a cookie by name.
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }
}
