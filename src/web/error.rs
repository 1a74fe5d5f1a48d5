use std::collections::BTreeMap;
use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a handler or middleware can hand back up the chain.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller input failed validation. Field detail is safe to expose.
    #[error("data validation error: {0}")]
    Validation(FieldErrors),

    /// A failure with its own client-facing message and status.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Respond as an internal error, then begin graceful shutdown.
    #[error("shutdown requested: {0}")]
    Shutdown(String),

    /// Anything else. Logged in full, reported as a bare 500.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn request(message: impl Into<String>, status: StatusCode) -> Self {
        Self::Request(RequestError::new(message, status))
    }

    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::Shutdown(message.into())
    }

    /// The shutdown message, if this error is or wraps a shutdown request.
    pub fn shutdown_message(&self) -> Option<&str> {
        match self {
            Self::Shutdown(message) => Some(message.as_str()),
            Self::Internal(err) => err
                .chain()
                .filter_map(|cause| cause.downcast_ref::<Error>())
                .find_map(|nested| match nested {
                    Self::Shutdown(message) => Some(message.as_str()),
                    _ => None,
                }),
            _ => None,
        }
    }
}

impl From<FieldErrors> for Error {
    fn from(fields: FieldErrors) -> Self {
        Self::Validation(fields)
    }
}

/// One message per offending field, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` for `field`, replacing any earlier message.
    pub fn add(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.0.insert(field.into(), message.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}

/// A trusted error whose message is returned to the client as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RequestError {
    message: String,
    status: StatusCode,
}

impl RequestError {
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// JSON body for every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            fields: None,
        }
    }
}
