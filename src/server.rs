//! HTTP server for an [`App`] with bounded graceful shutdown.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::web::{App, ShutdownListener, ShutdownReason};

/// Bind `addr` and serve `app` until shutdown is requested.
pub async fn start_http(
    app: App,
    addr: &str,
    shutdown: ShutdownListener,
    shutdown_timeout: Duration,
) -> Result<ShutdownReason> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding api listener on {addr}"))?;
    serve(listener, app, shutdown, shutdown_timeout).await
}

/// Serve `app` on an already bound listener.
///
/// Once `shutdown` fires the server stops accepting connections and gets
/// `shutdown_timeout` to finish in-flight requests. Returns the reason the
/// server stopped.
pub async fn serve(
    listener: TcpListener,
    app: App,
    shutdown: ShutdownListener,
    shutdown_timeout: Duration,
) -> Result<ShutdownReason> {
    let local_addr = listener.local_addr().context("reading local address")?;
    let router = app
        .into_router()
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let (reason_tx, reason_rx) = oneshot::channel();
    let signal = async move {
        let reason = shutdown.wait().await;
        let _ = reason_tx.send(reason);
    };

    info!(host = %local_addr, "api router started");

    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal);
    let mut server = std::pin::pin!(server.into_future());

    let reason = tokio::select! {
        result = &mut server => {
            result.context("server error")?;
            return Err(anyhow!("server stopped before shutdown was requested"));
        }
        reason = reason_rx => reason.context("shutdown listener dropped")?,
    };

    info!(reason = %reason, timeout = ?shutdown_timeout, "shutdown started");

    match tokio::time::timeout(shutdown_timeout, &mut server).await {
        Ok(result) => {
            result.context("server error during shutdown")?;
            info!(reason = %reason, "shutdown complete");
            Ok(reason)
        }
        Err(_) => {
            error!(timeout = ?shutdown_timeout, "in-flight requests did not finish");
            Err(anyhow!(
                "could not stop server gracefully within {shutdown_timeout:?}"
            ))
        }
    }
}
