//! Authenticated identity carried inside a verified token.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Administrator role.
pub const ROLE_ADMIN: &str = "ADMIN";

/// Regular user role.
pub const ROLE_USER: &str = "USER";

/// Identity and authorization claims.
///
/// Timestamps are kept at whole-second precision because that is all the
/// token's `iat`/`exp` fields can represent; [`Claims::new`] truncates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    issuer: String,
    subject: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    roles: Vec<String>,
}

impl Claims {
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        roles: Vec<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
            issued_at: issued_at.trunc_subsecs(0),
            expires_at: expires_at.trunc_subsecs(0),
            roles,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Returns true if the claims hold at least one of `required`.
    ///
    /// An empty `required` list never authorizes.
    pub fn authorized<S: AsRef<str>>(&self, required: &[S]) -> bool {
        self.roles
            .iter()
            .any(|has| required.iter().any(|want| has == want.as_ref()))
    }
}
