//! Routes served by the API.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::Request;
use axum::response::Response;
use axum::routing::MethodFilter;
use http::StatusCode;
use serde::Serialize;
use serde_json::json;

use crate::auth::{ROLE_ADMIN, TokenAuthority};
use crate::metrics::Metrics;
use crate::middleware::{self, Authenticate, Authorize};
use crate::web::{App, Chain, Error, RequestContext, ShutdownSignal, handler_fn, respond};

/// Everything the routes need.
pub struct ApiMuxConfig {
    pub service: String,
    pub shutdown: ShutdownSignal,
    pub authority: Arc<TokenAuthority>,
    pub metrics: Arc<Metrics>,
}

/// Build the application with every route registered.
pub fn api_mux(cfg: ApiMuxConfig) -> App {
    let global = Chain::new()
        .with(middleware::Errors::new(cfg.shutdown.clone()))
        .with(middleware::Logger::new(cfg.service))
        .with(middleware::Metrics::new(cfg.metrics.clone()))
        .with(middleware::Panics::new(cfg.metrics));

    let admin = Chain::new()
        .with(Authenticate::new(cfg.authority))
        .with(Authorize::new([ROLE_ADMIN]));

    App::new(cfg.shutdown, global)
        .handle(
            MethodFilter::GET,
            "/readiness",
            handler_fn(readiness),
            &Chain::new(),
        )
        .handle(MethodFilter::GET, "/test", handler_fn(test), &admin)
}

async fn readiness(_ctx: RequestContext, _req: Request) -> Result<Response, Error> {
    Ok(respond(&json!({ "status": "ok" }), StatusCode::OK))
}

#[derive(Serialize)]
struct TestStatus<'a> {
    status: &'static str,
    subject: &'a str,
}

/// Authenticated check for admins.
async fn test(ctx: RequestContext, _req: Request) -> Result<Response, Error> {
    let claims = ctx.claims().context("test route reached without claims")?;

    let status = TestStatus {
        status: "OK",
        subject: claims.subject(),
    };
    Ok(respond(&status, StatusCode::OK))
}
