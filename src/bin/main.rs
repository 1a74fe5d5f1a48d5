use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use shrt::config::ServiceConfig;
use shrt::server::start_http;
use shrt::web::shutdown;
use shrt::{ApiMuxConfig, Claims, Metrics, SignatureAlgorithm, api_mux, load_authority};

#[derive(Parser)]
#[command(name = "shrt-api")]
#[command(about = "shrt API service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every subcommand. Unset flags keep the value from
/// `SHRT_CONFIG` or the built-in default.
#[derive(clap::Args)]
struct AuthArgs {
    /// Directory of `<key id>.pem` private keys
    #[arg(long, env = "SHRT_AUTH_KEYS_FOLDER")]
    keys_folder: Option<PathBuf>,
    /// Also load keys from subdirectories
    #[arg(long, env = "SHRT_AUTH_RECURSIVE")]
    recursive: Option<bool>,
    /// Key id used to sign and verify tokens
    #[arg(long, env = "SHRT_AUTH_ACTIVE_KEY_ID")]
    active_key_id: Option<String>,
    /// RS256, RS384, RS512, PS256, PS384 or PS512
    #[arg(long, env = "SHRT_AUTH_ALGORITHM")]
    algorithm: Option<SignatureAlgorithm>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Bind address for the API
        #[arg(long, env = "SHRT_WEB_API_HOST")]
        api_host: Option<String>,
        /// Seconds to wait for in-flight requests during shutdown
        #[arg(long, env = "SHRT_WEB_SHUTDOWN_TIMEOUT")]
        shutdown_timeout: Option<u64>,
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Issue a token signed with the active key
    GenToken {
        /// Subject claim
        subject: String,
        /// Comma-separated roles, e.g. ADMIN,USER
        #[arg(long, value_delimiter = ',', default_value = "USER")]
        roles: Vec<String>,
        /// Token lifetime in hours
        #[arg(long, default_value_t = 8760)]
        ttl_hours: i64,
        #[command(flatten)]
        auth: AuthArgs,
    },
}

impl AuthArgs {
    fn apply(self, cfg: &mut ServiceConfig) {
        if let Some(folder) = self.keys_folder {
            cfg.auth.keys_folder = folder;
        }
        if let Some(recursive) = self.recursive {
            cfg.auth.recursive = recursive;
        }
        if let Some(id) = self.active_key_id {
            cfg.auth.active_key_id = id;
        }
        if let Some(algorithm) = self.algorithm {
            cfg.auth.algorithm = algorithm;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("shrt=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let mut cfg = ServiceConfig::load()?;

    match cli.command {
        Commands::Serve {
            api_host,
            shutdown_timeout,
            auth,
        } => {
            if let Some(host) = api_host {
                cfg.web.api_host = host;
            }
            if let Some(secs) = shutdown_timeout {
                cfg.web.shutdown_timeout_secs = secs;
            }
            auth.apply(&mut cfg);

            run(cfg).await?;
        }
        Commands::GenToken {
            subject,
            roles,
            ttl_hours,
            auth,
        } => {
            auth.apply(&mut cfg);
            let (_, authority) = load_authority(&cfg.auth)?;

            let now = Utc::now();
            let expires_at = token_expiry(now, ttl_hours)?;
            let issuer = cfg.auth.issuer.clone();
            let claims = Claims::new(issuer, subject, now, expires_at, roles);
            let token = authority.issue(&claims).context("issuing token")?;

            println!("{token}");
        }
    }

    Ok(())
}

/// Expiry of a token issued at `now` that lives for `ttl_hours`.
fn token_expiry(now: DateTime<Utc>, ttl_hours: i64) -> Result<DateTime<Utc>> {
    anyhow::ensure!(ttl_hours > 0, "ttl_hours must be positive, got {ttl_hours}");
    Duration::try_hours(ttl_hours)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .with_context(|| format!("ttl_hours {ttl_hours} is out of range"))
}

async fn run(cfg: ServiceConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting service");
    info!(config = %serde_json::to_string(&cfg)?, "startup");

    info!("initializing authentication & authorization support");
    let (keystore, authority) = load_authority(&cfg.auth)?;
    info!(keys = ?keystore.key_ids(), active = authority.active_key_id(), "keystore ready");

    let metrics = Arc::new(Metrics::new());
    let (signal, listener) = shutdown::channel();

    let app = api_mux(ApiMuxConfig {
        service: "shrt-api".to_string(),
        shutdown: signal,
        authority,
        metrics: metrics.clone(),
    });

    let timeout = cfg.web.shutdown_timeout();
    let result = start_http(app, &cfg.web.api_host, listener, timeout).await;

    info!(metrics = ?metrics.snapshot(), "final metrics");
    let reason = result?;
    info!(reason = %reason, "shutdown complete");

    Ok(())
}
