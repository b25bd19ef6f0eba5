//! Authentication claims, attribute checks and tickets
//!
//! Claims are produced by a [`TokenVerifier`] from a bearer token. A `None`
//! claims value means authentication is disabled; a `None` attribute set means
//! attribute based access control is disabled. Both grant every attribute.

use serde::{Deserialize, Serialize};

pub mod ticket;
pub mod verifier;

pub use ticket::{MemoryTicketStore, TicketError, TicketProvider, TicketStore};
pub use verifier::{AbacConfig, JwtTokenVerifier, NoopTokenVerifier, TokenVerifier, VerifyError};

pub const SIPS_LIST: &str = "ingest:sips:list";
pub const SIPS_READ: &str = "ingest:sips:read";
pub const SIPS_UPLOAD: &str = "ingest:sips:upload";
pub const SIPS_WORKFLOWS_LIST: &str = "ingest:sips:workflows:list";
pub const SIPS_REVIEW: &str = "ingest:sips:review";
pub const SIPS_DOWNLOAD: &str = "ingest:sips:download";
pub const USERS_LIST: &str = "ingest:users:list";
pub const SIPSOURCES_OBJECTS_LIST: &str = "ingest:sipsources:objects:list";

const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iss: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,
    /// Parsed from the configured claim path, never read from the token as is.
    #[serde(
        rename = "sipflow_internal_attributes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attributes: Option<Vec<String>>,
}

impl Claims {
    /// Whether every `required` attribute is granted, directly or through a
    /// wildcard ancestor such as `ingest:*` or `ingest:sips:*`.
    pub fn check_attributes(&self, required: &[&str]) -> bool {
        let Some(granted) = self.attributes.as_deref() else {
            return true;
        };
        if granted.iter().any(|a| a == WILDCARD) {
            return true;
        }
        required.iter().all(|attr| grants(granted, attr))
    }
}

/// Absent claims pass every check.
pub fn check_attributes(claims: Option<&Claims>, required: &[&str]) -> bool {
    claims.map_or(true, |c| c.check_attributes(required))
}

fn grants(granted: &[String], required: &str) -> bool {
    let mut attr = required.to_string();
    loop {
        if granted.iter().any(|g| *g == attr) {
            return true;
        }
        let base = attr.strip_suffix(":*").unwrap_or(&attr);
        let Some(idx) = base.rfind(':') else {
            return false;
        };
        attr = format!("{}:*", &base[..idx]);
    }
}
