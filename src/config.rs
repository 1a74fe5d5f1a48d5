use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};

use crate::auth::SignatureAlgorithm;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "SHRT_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub web: WebConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub api_host: String,
    pub shutdown_timeout_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            api_host: "0.0.0.0:3000".to_string(),
            shutdown_timeout_secs: 20,
        }
    }
}

impl WebConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Directory of `<key id>.pem` private keys.
    pub keys_folder: PathBuf,
    /// Walk subdirectories of `keys_folder` too.
    pub recursive: bool,
    pub active_key_id: String,
    pub algorithm: SignatureAlgorithm,
    /// `iss` claim for issued tokens.
    pub issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            keys_folder: PathBuf::from("zarf/keys/"),
            recursive: false,
            active_key_id: "ecdf8542-fbf3-404d-acdc-f41527a0c3c8".to_string(),
            algorithm: SignatureAlgorithm::RS256,
            issuer: "shrt-api".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load from the file named by `SHRT_CONFIG`, or fall back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let Ok(path) = env::var(CONFIG_PATH_ENV) else {
            return Ok(Self::default());
        };

        let path = PathBuf::from(path);
        let raw = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading config `{}`: {}", path.display(), e))?;
        Self::from_json(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config `{}`: {}", path.display(), e))
    }
}
