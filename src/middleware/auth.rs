use std::sync::Arc;

use axum::extract::Request;
use http::StatusCode;
use http::header::AUTHORIZATION;
use tracing::debug;

use crate::auth::{TokenAuthority, parse_bearer};
use crate::web::{Error, Handler, HandlerFuture, Middleware, RequestContext, SharedHandler};

/// Client-facing message for any token that fails verification.
const UNAUTHORIZED_MESSAGE: &str = "unauthorized";

/// Client-facing message for any authorization failure.
const FORBIDDEN_MESSAGE: &str = "you are not authorized for that action";

/// Verifies the bearer token and records the caller's claims.
#[derive(Debug, Clone)]
pub struct Authenticate {
    authority: Arc<TokenAuthority>,
}

impl Authenticate {
    pub fn new(authority: Arc<TokenAuthority>) -> Self {
        Self { authority }
    }
}

impl Middleware for Authenticate {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(AuthenticateHandler {
            authority: self.authority.clone(),
            next,
        })
    }
}

struct AuthenticateHandler {
    authority: Arc<TokenAuthority>,
    next: SharedHandler,
}

impl Handler for AuthenticateHandler {
    fn call(&self, mut ctx: RequestContext, req: Request) -> HandlerFuture<'_> {
        Box::pin(async move {
            let header = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();

            let token = parse_bearer(header)
                .map_err(|e| Error::request(e.to_string(), StatusCode::UNAUTHORIZED))?;

            let claims = self.authority.verify(token).map_err(|e| {
                debug!(trace_id = %ctx.trace_id(), error = %e, "Token verification failed");
                Error::request(UNAUTHORIZED_MESSAGE, StatusCode::UNAUTHORIZED)
            })?;

            ctx.set_claims(claims);
            self.next.call(ctx, req).await
        })
    }
}

/// Requires the authenticated caller to hold at least one of the given roles.
#[derive(Debug, Clone)]
pub struct Authorize {
    roles: Arc<[String]>,
}

impl Authorize {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

impl Middleware for Authorize {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(AuthorizeHandler {
            roles: self.roles.clone(),
            next,
        })
    }
}

struct AuthorizeHandler {
    roles: Arc<[String]>,
    next: SharedHandler,
}

impl Handler for AuthorizeHandler {
    fn call(&self, ctx: RequestContext, req: Request) -> HandlerFuture<'_> {
        Box::pin(async move {
            // No claims here means "not allowed", never "not authenticated".
            let allowed = match ctx.claims() {
                Ok(claims) => claims.authorized(&self.roles[..]),
                Err(e) => {
                    debug!(trace_id = %ctx.trace_id(), error = %e, "Authorization without claims");
                    false
                }
            };

            if !allowed {
                return Err(Error::request(FORBIDDEN_MESSAGE, StatusCode::FORBIDDEN));
            }

            self.next.call(ctx, req).await
        })
    }
}
