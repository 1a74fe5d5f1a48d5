use std::sync::Arc;

use axum::extract::Request;

use crate::metrics;
use crate::web::{Handler, HandlerFuture, Middleware, RequestContext, SharedHandler};

/// Updates the request, error and task-sample counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    metrics: Arc<metrics::Metrics>,
}

impl Metrics {
    pub fn new(metrics: Arc<metrics::Metrics>) -> Self {
        Self { metrics }
    }
}

impl Middleware for Metrics {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(MetricsHandler {
            metrics: self.metrics.clone(),
            next,
        })
    }
}

struct MetricsHandler {
    metrics: Arc<metrics::Metrics>,
    next: SharedHandler,
}

impl Handler for MetricsHandler {
    fn call(&self, ctx: RequestContext, req: Request) -> HandlerFuture<'_> {
        Box::pin(async move {
            let result = self.next.call(ctx, req).await;

            self.metrics.add_request();
            if result.is_err() {
                self.metrics.add_error();
            }

            result
        })
    }
}
