// Core modules
pub mod auth;
pub mod config;
pub mod keystore;
pub mod metrics;
pub mod web;

// Request pipeline and routes
pub mod handlers;
pub mod middleware;
pub mod server;

#[cfg(test)]
mod testutil;

// Re-export key types
pub use auth::{AuthError, Claims, ROLE_ADMIN, ROLE_USER, SignatureAlgorithm, TokenAuthority};
pub use config::ServiceConfig;
pub use handlers::{ApiMuxConfig, api_mux};
pub use keystore::{KeyStore, KeyStoreError, Recursion};
pub use metrics::{Metrics, MetricsSnapshot};
pub use web::{App, Chain, Error, Handler, Middleware, RequestContext};

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

/// Load the keystore and build the token authority described by `cfg`.
///
/// An empty key folder is an error.
pub fn load_authority(cfg: &config::AuthConfig) -> Result<(Arc<KeyStore>, Arc<TokenAuthority>)> {
    let recursion = if cfg.recursive {
        Recursion::Recursive
    } else {
        Recursion::Flat
    };

    let store = KeyStore::load_dir(&cfg.keys_folder, recursion)
        .with_context(|| format!("reading keys from `{}`", cfg.keys_folder.display()))?;
    if store.is_empty() {
        anyhow::bail!("no keys found in `{}`", cfg.keys_folder.display());
    }
    info!(keys = store.len(), folder = %cfg.keys_folder.display(), "Keystore loaded");

    let store = Arc::new(store);
    let authority =
        TokenAuthority::with_algorithm(cfg.active_key_id.clone(), store.clone(), cfg.algorithm)
            .context("constructing token authority")?;

    Ok((store, Arc::new(authority)))
}
