use std::sync::Arc;

use axum::extract::Request;
use chrono::Utc;
use tracing::info;

use super::errors::classify;
use crate::web::{Handler, HandlerFuture, Middleware, RequestContext, SharedHandler};

/// Logs the start and completion of every request.
#[derive(Debug, Clone)]
pub struct Logger {
    service: Arc<str>,
}

impl Logger {
    pub fn new(service: impl Into<Arc<str>>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Middleware for Logger {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(LoggerHandler {
            service: self.service.clone(),
            next,
        })
    }
}

struct LoggerHandler {
    service: Arc<str>,
    next: SharedHandler,
}

impl Handler for LoggerHandler {
    fn call(&self, ctx: RequestContext, req: Request) -> HandlerFuture<'_> {
        Box::pin(async move {
            let trace_id = ctx.trace_id();
            let received_at = ctx.received_at();
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let remote_addr = ctx
                .remote_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "-".to_string());

            info!(
                service = %self.service,
                trace_id = %trace_id,
                method = %method,
                path = %path,
                remote_addr = %remote_addr,
                "request started"
            );

            let result = self.next.call(ctx, req).await;
            let elapsed = (Utc::now() - received_at).to_std().unwrap_or_default();

            // Errors are answered further out; report the status they will get.
            let status = match &result {
                Ok(response) => response.status(),
                Err(err) => classify(err).0,
            };

            info!(
                service = %self.service,
                trace_id = %trace_id,
                method = %method,
                path = %path,
                remote_addr = %remote_addr,
                status = status.as_u16(),
                elapsed = ?elapsed,
                "request completed"
            );

            result
        })
    }
}
