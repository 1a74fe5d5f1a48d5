//! In-memory registry of RSA signing keys addressed by key id.
//!
//! Keys are usually loaded once at startup from a directory of PEM files,
//! where each file's stem becomes the key id:
//!
//! ```text
//! keys/
//!   54bb2165-71e1-41a6-af3e-7da4a0e1e2c1.pem   -> kid "54bb2165-71e1-41a6-af3e-7da4a0e1e2c1"
//!   legacy.pem                                 -> kid "legacy"
//! ```
//!
//! Lookups take a shared lock and hand out `Arc`ed entries, so request tasks
//! never block each other. `add`/`remove` take the write lock only for the
//! map swap itself; entries are fully built before they are inserted.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, EncodingKey};
use parking_lot::RwLock;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use tracing::debug;

/// File extension recognised by the directory loader.
pub const KEY_FILE_EXTENSION: &str = "pem";

/// Errors produced by [`KeyStore`] operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// No key is registered under the requested id.
    #[error("no key was found with key id '{0}'")]
    KeyNotFound(String),

    /// The public half could not be derived from the stored private key.
    #[error("could not derive public key for key id '{key_id}': {reason}")]
    KeyDerivationFailed { key_id: String, reason: String },

    /// The supplied key material could not be parsed or encoded.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// Reading the key source failed.
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bulk loading aborted on a specific entry.
    #[error("loading key file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: Box<KeyStoreError>,
    },
}

/// Whether the directory loader descends into sub-directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Recursion {
    /// Only files directly inside the directory are considered.
    #[default]
    Flat,
    /// Sub-directories are walked as well; ids still come from file stems.
    Recursive,
}

/// Private key material plus the pre-encoded signing key.
pub struct SigningKey {
    key_id: String,
    private_key: RsaPrivateKey,
    encoding_key: EncodingKey,
}

impl SigningKey {
    fn new(key_id: String, private_key: RsaPrivateKey) -> Result<Self, KeyStoreError> {
        let der = private_key
            .to_pkcs1_der()
            .map_err(|e| KeyStoreError::InvalidKey(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_der(der.as_bytes());

        Ok(Self {
            key_id,
            private_key,
            encoding_key,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Public counterpart of a [`SigningKey`], ready for signature verification.
pub struct VerifyingKey {
    key_id: String,
    public_key: RsaPublicKey,
    decoding_key: DecodingKey,
}

impl VerifyingKey {
    fn derive(signing: &SigningKey) -> Result<Self, KeyStoreError> {
        let public_key = signing.private_key.to_public_key();

        // Same encoding a JWKS document would carry for `n` and `e`.
        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        let decoding_key = match DecodingKey::from_rsa_components(&n, &e) {
            Ok(key) => key,
            Err(err) => {
                return Err(KeyStoreError::KeyDerivationFailed {
                    key_id: signing.key_id.clone(),
                    reason: err.to_string(),
                });
            }
        };

        Ok(Self {
            key_id: signing.key_id.clone(),
            public_key,
            decoding_key,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyingKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Thread-safe store of signing keys.
#[derive(Default)]
pub struct KeyStore {
    keys: RwLock<HashMap<String, Arc<SigningKey>>>,
}

impl KeyStore {
    /// Create an empty keystore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a keystore from the `.pem` files directly inside `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        Self::load_dir(dir, Recursion::Flat)
    }

    /// Build a keystore from a directory of PEM files.
    ///
    /// Files without the `.pem` extension are ignored. The first file that
    /// fails to parse aborts the whole load.
    pub fn load_dir(dir: impl AsRef<Path>, recursion: Recursion) -> Result<Self, KeyStoreError> {
        let store = Self::new();
        let mut pending = vec![dir.as_ref().to_path_buf()];

        while let Some(current) = pending.pop() {
            let entries = fs::read_dir(&current).map_err(|source| KeyStoreError::Io {
                path: current.clone(),
                source,
            })?;

            for entry in entries {
                let entry = entry.map_err(|source| KeyStoreError::Io {
                    path: current.clone(),
                    source,
                })?;
                let path = entry.path();
                let file_type = entry.file_type().map_err(|source| KeyStoreError::Io {
                    path: path.clone(),
                    source,
                })?;

                if file_type.is_dir() {
                    if recursion == Recursion::Recursive {
                        pending.push(path);
                    }
                    continue;
                }

                if path.extension().and_then(|ext| ext.to_str()) != Some(KEY_FILE_EXTENSION) {
                    continue;
                }

                let Some(key_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };

                store
                    .load_file(&path, key_id)
                    .map_err(|source| KeyStoreError::Load {
                        path: path.clone(),
                        source: Box::new(source),
                    })?;
            }
        }

        debug!(keys = store.len(), "Loaded keystore");
        Ok(store)
    }

    fn load_file(&self, path: &Path, key_id: &str) -> Result<(), KeyStoreError> {
        let pem = fs::read_to_string(path).map_err(|source| KeyStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_pem(&pem, key_id)
    }

    /// Insert or replace the key registered under `key_id`.
    pub fn add(
        &self,
        private_key: RsaPrivateKey,
        key_id: impl Into<String>,
    ) -> Result<(), KeyStoreError> {
        let key_id = key_id.into();
        let entry = Arc::new(SigningKey::new(key_id.clone(), private_key)?);
        self.keys.write().insert(key_id, entry);
        Ok(())
    }

    /// Parse a PKCS#1 or PKCS#8 PEM private key and add it under `key_id`.
    pub fn add_pem(&self, pem: &str, key_id: impl Into<String>) -> Result<(), KeyStoreError> {
        self.add(parse_private_key_pem(pem)?, key_id)
    }

    /// Remove the key registered under `key_id`.
    pub fn remove(&self, key_id: &str) -> Result<(), KeyStoreError> {
        self.keys
            .write()
            .remove(key_id)
            .map(|_| ())
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))
    }

    /// Look up the signing key for `key_id`.
    pub fn private_key(&self, key_id: &str) -> Result<Arc<SigningKey>, KeyStoreError> {
        self.keys
            .read()
            .get(key_id)
            .cloned()
            .ok_or_else(|| KeyStoreError::KeyNotFound(key_id.to_string()))
    }

    /// Derive the verifying key for `key_id` from its stored private key.
    pub fn public_key(&self, key_id: &str) -> Result<VerifyingKey, KeyStoreError> {
        let signing = self.private_key(key_id)?;
        VerifyingKey::derive(&signing)
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.read().contains_key(key_id)
    }

    /// Registered key ids, sorted.
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("key_ids", &self.key_ids())
            .finish()
    }
}

/// Parse a PEM-encoded RSA private key in either PKCS#1 or PKCS#8 form.
pub fn parse_private_key_pem(pem: &str) -> Result<RsaPrivateKey, KeyStoreError> {
    RsaPrivateKey::from_pkcs1_pem(pem).or_else(|pkcs1_err| {
        RsaPrivateKey::from_pkcs8_pem(pem).map_err(|pkcs8_err| {
            KeyStoreError::InvalidKey(format!("pkcs1: {pkcs1_err}; pkcs8: {pkcs8_err}"))
        })
    })
}
