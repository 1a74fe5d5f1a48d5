//! Token issuance and verification against a shared [`KeyStore`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::claims::Claims;
use crate::keystore::{KeyStore, KeyStoreError};

/// Authentication and authorization failures.
///
/// The messages are for logs. Clients only ever see the generic text the
/// middleware substitutes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("active key '{0}' is not present in the keystore")]
    ActiveKeyUnavailable(String),

    #[error("signing token: {0}")]
    SigningFailed(String),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("verification key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("token has expired")]
    TokenExpired,

    #[error("token is not valid yet")]
    TokenNotYetValid,

    #[error("token has no usable roles claim")]
    MissingRolesClaim,

    #[error("expected authorization header format: Bearer <token>")]
    MalformedAuthHeader,

    #[error("claims value missing from request context")]
    ClaimsMissing,

    #[error("unsupported signature algorithm '{0}'")]
    UnsupportedAlgorithm(String),
}

/// Asymmetric signature schemes a [`TokenAuthority`] can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignatureAlgorithm {
    #[default]
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
        }
    }
}

impl From<SignatureAlgorithm> for Algorithm {
    fn from(alg: SignatureAlgorithm) -> Self {
        match alg {
            SignatureAlgorithm::RS256 => Algorithm::RS256,
            SignatureAlgorithm::RS384 => Algorithm::RS384,
            SignatureAlgorithm::RS512 => Algorithm::RS512,
            SignatureAlgorithm::PS256 => Algorithm::PS256,
            SignatureAlgorithm::PS384 => Algorithm::PS384,
            SignatureAlgorithm::PS512 => Algorithm::PS512,
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "RS512" => Ok(Self::RS512),
            "PS256" => Ok(Self::PS256),
            "PS384" => Ok(Self::PS384),
            "PS512" => Ok(Self::PS512),
            _ => Err(AuthError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim set as it is written into a token.
#[derive(Serialize)]
struct IssuedPayload<'a> {
    iss: &'a str,
    sub: &'a str,
    iat: i64,
    exp: i64,
    roles: &'a [String],
}

/// Claim set as it is read back out of a verified token.
///
/// `roles` stays untyped so a wrongly shaped claim can be reported as such
/// instead of failing the whole decode.
#[derive(Deserialize)]
struct VerifiedPayload {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
    #[serde(default)]
    roles: Option<Value>,
}

/// Issues and verifies signed tokens with a single active key.
#[derive(Debug)]
pub struct TokenAuthority {
    active_key_id: String,
    keystore: Arc<KeyStore>,
    algorithm: SignatureAlgorithm,
}

impl TokenAuthority {
    /// Create an RS256 authority signing with `active_key_id`.
    pub fn new(
        active_key_id: impl Into<String>,
        keystore: Arc<KeyStore>,
    ) -> Result<Self, AuthError> {
        Self::with_algorithm(active_key_id, keystore, SignatureAlgorithm::default())
    }

    /// Create an authority with an explicit signature algorithm.
    ///
    /// Fails if the active key is not in the keystore right now.
    pub fn with_algorithm(
        active_key_id: impl Into<String>,
        keystore: Arc<KeyStore>,
        algorithm: SignatureAlgorithm,
    ) -> Result<Self, AuthError> {
        let active_key_id = active_key_id.into();
        if let Err(e) = keystore.private_key(&active_key_id) {
            debug!(error = %e, "Active key lookup failed");
            return Err(AuthError::ActiveKeyUnavailable(active_key_id));
        }

        Ok(Self {
            active_key_id,
            keystore,
            algorithm,
        })
    }

    pub fn active_key_id(&self) -> &str {
        &self.active_key_id
    }

    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    /// Sign `claims` into a compact token string.
    pub fn issue(&self, claims: &Claims) -> Result<String, AuthError> {
        let signing_key = self
            .keystore
            .private_key(&self.active_key_id)
            .map_err(|e| AuthError::SigningFailed(e.to_string()))?;

        let payload = IssuedPayload {
            iss: claims.issuer(),
            sub: claims.subject(),
            iat: claims.issued_at().timestamp(),
            exp: claims.expires_at().timestamp(),
            roles: claims.roles(),
        };

        let mut header = Header::new(self.algorithm.into());
        header.kid = Some(self.active_key_id.clone());

        encode(&header, &payload, signing_key.encoding_key())
            .map_err(|e| AuthError::SigningFailed(e.to_string()))
    }

    /// Verify `token` against the current wall clock.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify `token` as of `now`.
    ///
    /// The signature is always checked with the authority's active key; any
    /// `kid` the token carries is ignored.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        check_structure(token)?;

        let verifying_key = self
            .keystore
            .public_key(&self.active_key_id)
            .map_err(|e| match e {
                KeyStoreError::KeyNotFound(id) => AuthError::KeyUnavailable(id),
                other => AuthError::KeyUnavailable(other.to_string()),
            })?;

        let mut validation = Validation::new(self.algorithm.into());
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<VerifiedPayload>(token, verifying_key.decoding_key(), &validation)
            .map_err(|e| map_decode_error(e, &self.active_key_id))?;
        let payload = data.claims;

        let issued_at = DateTime::from_timestamp(payload.iat, 0)
            .ok_or_else(|| AuthError::MalformedToken("iat out of range".to_string()))?;
        let expires_at = DateTime::from_timestamp(payload.exp, 0)
            .ok_or_else(|| AuthError::MalformedToken("exp out of range".to_string()))?;

        if now < issued_at {
            return Err(AuthError::TokenNotYetValid);
        }
        if now >= expires_at {
            return Err(AuthError::TokenExpired);
        }

        let roles = parse_roles(payload.roles)?;

        Ok(Claims::new(
            payload.iss,
            payload.sub,
            issued_at,
            expires_at,
            roles,
        ))
    }
}

/// Reject anything that is not three dot-separated segments with a decodable header.
fn check_structure(token: &str) -> Result<(), AuthError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(AuthError::MalformedToken(
            "expected three non-empty segments".to_string(),
        ));
    }

    decode_header(token)
        .map(|_| ())
        .map_err(|e| AuthError::MalformedToken(e.to_string()))
}

fn map_decode_error(err: jsonwebtoken::errors::Error, key_id: &str) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::MalformedToken(err.to_string()),
        ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::Provider(_)
        | ErrorKind::Signing(_) => {
            warn!(key_id, error = %err, "Verifying key rejected by crypto backend");
            AuthError::KeyUnavailable(key_id.to_string())
        }
        other => {
            debug!(kind = ?other, "Unexpected token decode failure");
            AuthError::InvalidSignature
        }
    }
}

fn parse_roles(value: Option<Value>) -> Result<Vec<String>, AuthError> {
    let Some(Value::Array(items)) = value else {
        return Err(AuthError::MissingRolesClaim);
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::String(role) => Ok(role),
            _ => Err(AuthError::MissingRolesClaim),
        })
        .collect()
}
