//! Request-scoped context.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::{AuthError, Claims};

/// Per-request values passed by value through the handler chain.
///
/// Created once when a request enters the pipeline. Middleware that learns
/// something about the caller (currently only [`Claims`]) records it here
/// for the handlers further in.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlates every log line for one request.
    trace_id: Uuid,
    /// When the request entered the pipeline.
    received_at: DateTime<Utc>,
    /// Peer address, when the transport provides one.
    remote_addr: Option<SocketAddr>,
    /// Set by authentication.
    claims: Option<Claims>,
}

impl RequestContext {
    pub fn new(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            received_at: Utc::now(),
            remote_addr,
            claims: None,
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Claims of the authenticated caller.
    pub fn claims(&self) -> Result<&Claims, AuthError> {
        self.claims.as_ref().ok_or(AuthError::ClaimsMissing)
    }

    pub fn set_claims(&mut self, claims: Claims) {
        self.claims = Some(claims);
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(None)
    }
}
