use std::sync::Arc;

use axum::extract::Request;
use http::StatusCode;
use tracing::{debug, error, warn};

use crate::web::{
    Error, ErrorResponse, FieldErrors, Handler, HandlerFuture, Middleware, RequestContext,
    RequestError, SharedHandler, ShutdownReason, ShutdownSignal, respond,
};

/// Body text for field validation failures.
pub const VALIDATION_MESSAGE: &str = "data validation error";

/// Body text for everything that is not a trusted client error.
pub const INTERNAL_MESSAGE: &str = "Internal Server Error";

/// Map an error to the status and body the client sees.
///
/// Field validation errors come first, then request errors carrying their
/// own status. Both are also found inside an `anyhow` chain. Everything else
/// is a 500 with no detail.
pub fn classify(err: &Error) -> (StatusCode, ErrorResponse) {
    match err {
        Error::Validation(fields) => validation(fields),
        Error::Request(request) => trusted(request),
        Error::Internal(inner) => {
            for cause in inner.chain() {
                if let Some(fields) = cause.downcast_ref::<FieldErrors>() {
                    return validation(fields);
                }
                if let Some(request) = cause.downcast_ref::<RequestError>() {
                    return trusted(request);
                }
                if let Some(nested @ (Error::Validation(_) | Error::Request(_))) =
                    cause.downcast_ref::<Error>()
                {
                    return classify(nested);
                }
            }
            internal()
        }
        Error::Shutdown(_) => internal(),
    }
}

fn validation(fields: &FieldErrors) -> (StatusCode, ErrorResponse) {
    (
        StatusCode::BAD_REQUEST,
        ErrorResponse {
            error: VALIDATION_MESSAGE.to_string(),
            fields: Some(fields.fields().clone()),
        },
    )
}

fn trusted(request: &RequestError) -> (StatusCode, ErrorResponse) {
    (request.status(), ErrorResponse::new(request.message()))
}

fn internal() -> (StatusCode, ErrorResponse) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorResponse::new(INTERNAL_MESSAGE),
    )
}

/// Turns errors from the rest of the chain into uniform JSON responses.
///
/// Install it first so it wraps everything else. A shutdown error is
/// answered like any internal error and then forwarded to the shutdown
/// signal.
#[derive(Debug, Clone)]
pub struct Errors {
    shutdown: ShutdownSignal,
}

impl Errors {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self { shutdown }
    }
}

impl Middleware for Errors {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        Arc::new(ErrorsHandler {
            shutdown: self.shutdown.clone(),
            next,
        })
    }
}

struct ErrorsHandler {
    shutdown: ShutdownSignal,
    next: SharedHandler,
}

impl Handler for ErrorsHandler {
    fn call(&self, ctx: RequestContext, req: Request) -> HandlerFuture<'_> {
        Box::pin(async move {
            let trace_id = ctx.trace_id();

            let err = match self.next.call(ctx, req).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            let (status, body) = classify(&err);
            if status.is_server_error() {
                error!(
                    trace_id = %trace_id,
                    status = status.as_u16(),
                    error = ?err,
                    "Request failed"
                );
            } else {
                debug!(
                    trace_id = %trace_id,
                    status = status.as_u16(),
                    error = %err,
                    "Request rejected"
                );
            }

            let response = respond(&body, status);

            if let Some(message) = err.shutdown_message() {
                warn!(
                    trace_id = %trace_id,
                    reason = message,
                    "Shutdown requested from request pipeline"
                );
                let reason = ShutdownReason::Requested(message.to_string());
                self.shutdown.signal(reason);
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::LogCapture;
    use crate::web::{Chain, handler_fn, shutdown};
    use axum::body::Body;
    use axum::response::Response;

    #[test]
    fn test_classify_validation() {
        let err = Error::from(FieldErrors::new().add("email", "required"));
        let (status, body) = classify(&err);

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"error":"data validation error","fields":{"email":"required"}}"#
        );
    }

    #[test]
    fn test_classify_request_error_keeps_status() {
        let err = Error::request("nope", StatusCode::CONFLICT);
        let (status, body) = classify(&err);
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, ErrorResponse::new("nope"));
    }

    #[test]
    fn test_classify_internal_hides_detail() {
        let err = Error::from(anyhow::anyhow!("database password is hunter2"));
        let (status, body) = classify(&err);

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"error":"Internal Server Error"}"#);
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_classify_looks_through_anyhow_chain() {
        let gone = RequestError::new("gone", StatusCode::GONE);
        let wrapped = anyhow::Error::from(gone).context("loading link");
        let (status, _) = classify(&Error::from(wrapped));
        assert_eq!(status, StatusCode::GONE);

        let fields = FieldErrors::new().add("url", "invalid");
        let wrapped = anyhow::Error::from(fields).context("parsing input");
        let (status, body) = classify(&Error::from(wrapped));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.fields.unwrap()["url"], "invalid");

        let nested = anyhow::Error::from(Error::request("teapot", StatusCode::IM_A_TEAPOT));
        let (status, _) = classify(&Error::from(nested));
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn test_classify_shutdown_is_internal() {
        let (status, body) = classify(&Error::shutdown("integrity"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, ErrorResponse::new(INTERNAL_MESSAGE));
    }

    #[tokio::test]
    async fn test_internal_error_logged_with_trace_id() {
        let capture = LogCapture::new();
        let _guard = capture.install();
        let (signal, _listener) = shutdown::channel();

        let failing = handler_fn(|_ctx, _req| async {
            Err::<Response, _>(Error::from(anyhow::anyhow!("connection refused by db-1")))
        });
        let handler = Chain::new().with(Errors::new(signal)).then(failing);

        let ctx = RequestContext::default();
        let trace_id = ctx.trace_id();
        let req = http::Request::get("/links").body(Body::empty()).unwrap();
        let response = handler.call(ctx, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let logs = capture.contents();
        assert!(logs.contains("Request failed"), "{logs}");
        assert!(logs.contains(&format!("trace_id={trace_id}")), "{logs}");
        assert!(logs.contains("connection refused by db-1"), "{logs}");
        assert!(logs.contains("status=500"), "{logs}");
    }
}
