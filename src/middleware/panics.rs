use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::Request;
use futures::FutureExt;
use tracing::error;

use crate::metrics;
use crate::web::{Error, Handler, HandlerFuture, Middleware, RequestContext, SharedHandler};

/// Turns a panic anywhere further in into an internal error.
#[derive(Debug, Clone)]
pub struct Panics {
    metrics: Arc<metrics::Metrics>,
}

impl Panics {
    pub fn new(metrics: Arc<metrics::Metrics>) -> Self {
        Self { metrics }
    }
}

impl Middleware for Panics {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(PanicsHandler {
            metrics: self.metrics.clone(),
            next,
        })
    }
}

struct PanicsHandler {
    metrics: Arc<metrics::Metrics>,
    next: SharedHandler,
}

impl Handler for PanicsHandler {
    fn call(&self, ctx: RequestContext, req: Request) -> HandlerFuture<'_> {
        Box::pin(async move {
            let trace_id = ctx.trace_id();
            let inner = async { self.next.call(ctx, req).await };

            match AssertUnwindSafe(inner).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => {
                    self.metrics.add_panic();
                    let message = panic_message(payload.as_ref());
                    error!(trace_id = %trace_id, panic = %message, "Handler panicked");
                    Err(Error::Internal(anyhow!("panic: {message}")))
                }
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
