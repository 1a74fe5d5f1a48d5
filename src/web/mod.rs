//! A small handler/middleware layer on top of axum.
//!
//! Handlers receive an explicit [`RequestContext`] and return
//! `Result<Response, Error>`. Cross-cutting behaviour is written as
//! [`Middleware`], which turns one handler into another, and composed with a
//! [`Chain`]. An [`App`] owns the router, the global chain and the shutdown
//! signal.

mod context;
mod error;
pub mod shutdown;

pub use context::RequestContext;
pub use error::{Error, ErrorResponse, FieldErrors, RequestError};
pub use shutdown::{ShutdownListener, ShutdownReason, ShutdownSignal};

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Request};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{MethodFilter, on};
use http::StatusCode;
use serde::Serialize;
use tracing::error;

/// Boxed future returned by [`Handler::call`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Response, Error>> + Send + 'a>>;

/// Something that can answer a request.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: RequestContext, req: Request) -> HandlerFuture<'_>;
}

/// Shared, type-erased handler.
pub type SharedHandler = Arc<dyn Handler>;

/// Wraps a handler with behaviour that runs before and/or after it.
///
/// Any state the middleware needs is captured when it is constructed.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: SharedHandler) -> SharedHandler;
}

struct FnHandler<F>(F);

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext, req: Request) -> HandlerFuture<'_> {
        Box::pin((self.0)(ctx, req))
    }
}

/// Turn an async function or closure into a [`SharedHandler`].
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Ordered list of middleware.
///
/// The first middleware added is the outermost: it sees the request first
/// and the result last.
#[derive(Clone, Default)]
pub struct Chain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware (builder style).
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Wrap `handler` with every middleware in the chain.
    pub fn then(&self, handler: SharedHandler) -> SharedHandler {
        self.middleware
            .iter()
            .rev()
            .fold(handler, |next, middleware| middleware.wrap(next))
    }
}

/// Serialize `data` as the JSON response body. `204 No Content` gets no body.
pub fn respond<T: Serialize>(data: &T, status: StatusCode) -> Response {
    if status == StatusCode::NO_CONTENT {
        return status.into_response();
    }
    (status, Json(data)).into_response()
}

/// Entry point that owns the routes, the global middleware and the shutdown signal.
pub struct App {
    router: Router,
    shutdown: ShutdownSignal,
    chain: Chain,
}

impl App {
    /// The global chain is fixed from here on.
    pub fn new(shutdown: ShutdownSignal, chain: Chain) -> Self {
        Self {
            router: Router::new(),
            shutdown,
            chain,
        }
    }

    /// Register `handler` for `method` and `path`.
    ///
    /// `route_chain` wraps the handler first, then the global chain wraps
    /// the result, so global middleware always runs outside route middleware.
    pub fn handle(
        mut self,
        method: MethodFilter,
        path: &str,
        handler: SharedHandler,
        route_chain: &Chain,
    ) -> Self {
        let handler = self.chain.then(route_chain.then(handler));
        let shutdown = self.shutdown.clone();

        let endpoint = move |req: Request| {
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            async move { dispatch(handler, shutdown, req).await }
        };

        self.router = self.router.route(path, on(method, endpoint));
        self
    }

    /// Ask the process to shut down gracefully.
    pub fn signal_shutdown(&self) -> bool {
        self.shutdown.signal(ShutdownReason::Terminate)
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

async fn dispatch(handler: SharedHandler, shutdown: ShutdownSignal, req: Request) -> Response {
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ctx = RequestContext::new(remote_addr);
    let trace_id = ctx.trace_id();

    match handler.call(ctx, req).await {
        Ok(response) => response,
        Err(err) => {
            // Only reachable when no error middleware is installed.
            error!(trace_id = %trace_id, error = ?err, "Unhandled error reached the router");
            if let Some(message) = err.shutdown_message() {
                shutdown.signal(ShutdownReason::Requested(message.to_string()));
            }
            respond(
                &ErrorResponse::new("Internal Server Error"),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use parking_lot::Mutex;
    use tower::ServiceExt;

    /// Records entry and exit in a shared journal.
    struct Trace {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
    }

    struct TraceHandler {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        next: SharedHandler,
    }

    impl Middleware for Trace {
        fn wrap(&self, next: SharedHandler) -> SharedHandler {
            Arc::new(TraceHandler {
                name: self.name,
                journal: self.journal.clone(),
                next,
            })
        }
    }

    impl Handler for TraceHandler {
        fn call(&self, ctx: RequestContext, req: Request) -> HandlerFuture<'_> {
            Box::pin(async move {
                self.journal.lock().push(format!("in:{}", self.name));
                let result = self.next.call(ctx, req).await;
                self.journal.lock().push(format!("out:{}", self.name));
                result
            })
        }
    }

    fn trace(name: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> Trace {
        Trace {
            name,
            journal: journal.clone(),
        }
    }

    fn ok_handler(journal: &Arc<Mutex<Vec<String>>>) -> SharedHandler {
        let journal = journal.clone();
        handler_fn(move |_ctx, _req| {
            let journal = journal.clone();
            async move {
                journal.lock().push("handler".to_string());
                let body = serde_json::json!({ "status": "OK" });
                Ok::<_, Error>(respond(&body, StatusCode::OK))
            }
        })
    }

    #[tokio::test]
    async fn test_chain_first_is_outermost() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new()
            .with(trace("a", &journal))
            .with(trace("b", &journal))
            .with(trace("c", &journal));

        let handler = chain.then(ok_handler(&journal));
        let response = handler
            .call(RequestContext::default(), Request::new(Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *journal.lock(),
            vec!["in:a", "in:b", "in:c", "handler", "out:c", "out:b", "out:a"]
        );
    }

    #[tokio::test]
    async fn test_global_chain_wraps_route_chain() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let (signal, _listener) = shutdown::channel();

        let global = Chain::new().with(trace("global", &journal));
        let route = Chain::new().with(trace("route", &journal));
        let handler = ok_handler(&journal);
        let app = App::new(signal, global).handle(MethodFilter::GET, "/ping", handler, &route);

        let response = app
            .into_router()
            .oneshot(http::Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *journal.lock(),
            vec!["in:global", "in:route", "handler", "out:route", "out:global"]
        );
    }

    #[tokio::test]
    async fn test_unhandled_error_is_bare_500() {
        let (signal, listener) = shutdown::channel();
        let fail = handler_fn(|_ctx, _req| async {
            Err::<Response, _>(Error::shutdown("integrity check failed"))
        });

        let none = Chain::new();
        let app = App::new(signal, none.clone()).handle(MethodFilter::GET, "/fail", fail, &none);
        let response = app
            .into_router()
            .oneshot(http::Request::get("/fail").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"error":"Internal Server Error"}"#);
        let expected = ShutdownReason::Requested("integrity check failed".to_string());
        assert_eq!(listener.recv().await, Some(expected));
    }

    #[tokio::test]
    async fn test_respond_no_content_has_empty_body() {
        let ignored = serde_json::json!({ "ignored": true });
        let response = respond(&ignored, StatusCode::NO_CONTENT);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_signal_shutdown_queues_terminate() {
        let (signal, listener) = shutdown::channel();
        let app = App::new(signal, Chain::new());

        assert!(app.signal_shutdown());
        assert!(!app.signal_shutdown());
        assert_eq!(listener.recv().await, Some(ShutdownReason::Terminate));
    }
}
