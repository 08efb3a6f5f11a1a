//! Actor key pairs
//!
//! RSA keys used to sign outbound requests, stored as PKCS#8 PEM under
//! `key/{handle}`. A pair is generated on first use and kept until rotated.

use chrono::{DateTime, Utc};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::store::KvStore;
use crate::error::AppError;

const KEY_PREFIX: &str = "key/";

/// An actor's signing key and its exported forms.
#[derive(Clone)]
pub struct KeyPair {
    private_key: RsaPrivateKey,
    private_key_pem: String,
    public_key_pem: String,
    created_at: DateTime<Utc>,
}

impl KeyPair {
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key_pem
    }

    /// SPKI PEM published in the actor document
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn from_private_key(private_key: RsaPrivateKey, created_at: DateTime<Utc>) -> Result<Self, AppError> {
        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::KeyFormat(format!("failed to export private key: {}", e)))?
            .to_string();
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::KeyFormat(format!("failed to export public key: {}", e)))?;

        Ok(Self {
            private_key,
            private_key_pem,
            public_key_pem,
            created_at,
        })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key_pem", &self.public_key_pem)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Stored value of a key pair
#[derive(Debug, Serialize, Deserialize)]
struct StoredKeyPair {
    private_key_pem: String,
    public_key_pem: String,
    created_at: DateTime<Utc>,
}

/// Key store
///
/// Persists key pairs through the injected [`KvStore`] and memoizes decoded
/// pairs per handle.
pub struct KeyStore {
    store: Arc<dyn KvStore>,
    key_bits: usize,
    memo: RwLock<HashMap<String, Arc<KeyPair>>>,
}

fn key_for(handle: &str) -> String {
    format!("{}{}", KEY_PREFIX, handle)
}

impl KeyStore {
    pub fn new(store: Arc<dyn KvStore>, key_bits: usize) -> Self {
        Self {
            store,
            key_bits,
            memo: RwLock::new(HashMap::new()),
        }
    }

    /// Return the key pair for `handle`, generating and persisting one first
    /// if none is stored.
    ///
    /// Concurrent first calls race on an insert-if-absent; the losers discard
    /// their generated key and return the stored winner, so every caller sees
    /// the same pair.
    ///
    /// # Errors
    /// - `Storage` if the persistence layer fails
    /// - `KeyFormat` if the stored pair cannot be decoded
    pub async fn get_or_create(&self, handle: &str) -> Result<Arc<KeyPair>, AppError> {
        if let Some(pair) = self.memo.read().await.get(handle) {
            return Ok(pair.clone());
        }

        let key = key_for(handle);
        let raw = match self.store.get(&key).await? {
            Some(raw) => raw,
            None => {
                let generated = generate_key_pair(self.key_bits).await?;
                let encoded = encode_key_pair(&generated)?;

                if self.store.insert_if_absent(&key, &encoded).await? {
                    tracing::info!(%handle, bits = self.key_bits, "Generated actor key pair");
                } else {
                    tracing::debug!(%handle, "Key pair was stored concurrently; using stored pair");
                }

                self.store.get(&key).await?.ok_or_else(|| {
                    AppError::Storage(format!("key record {} missing after insert", key))
                })?
            }
        };

        let pair = Arc::new(decode_key_pair(&raw)?);
        self.memo
            .write()
            .await
            .insert(handle.to_string(), pair.clone());
        Ok(pair)
    }

    /// Replace the stored key pair for `handle` with a freshly generated one.
    pub async fn rotate(&self, handle: &str) -> Result<Arc<KeyPair>, AppError> {
        let generated = generate_key_pair(self.key_bits).await?;
        let encoded = encode_key_pair(&generated)?;
        self.store.set(&key_for(handle), &encoded).await?;

        let pair = Arc::new(generated);
        self.memo
            .write()
            .await
            .insert(handle.to_string(), pair.clone());

        tracing::info!(%handle, "Rotated actor key pair");
        Ok(pair)
    }
}

async fn generate_key_pair(bits: usize) -> Result<KeyPair, AppError> {
    let private_key = tokio::task::spawn_blocking(move || {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, bits)
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))?
    .map_err(|e| AppError::Internal(e.into()))?;

    KeyPair::from_private_key(private_key, Utc::now())
}

fn encode_key_pair(pair: &KeyPair) -> Result<String, AppError> {
    serde_json::to_string(&StoredKeyPair {
        private_key_pem: pair.private_key_pem.clone(),
        public_key_pem: pair.public_key_pem.clone(),
        created_at: pair.created_at,
    })
    .map_err(|e| AppError::Internal(e.into()))
}

fn decode_key_pair(raw: &str) -> Result<KeyPair, AppError> {
    let stored: StoredKeyPair = serde_json::from_str(raw)
        .map_err(|e| AppError::KeyFormat(format!("invalid key record: {}", e)))?;

    let private_key = RsaPrivateKey::from_pkcs8_pem(&stored.private_key_pem)
        .map_err(|e| AppError::KeyFormat(format!("invalid private key: {}", e)))?;

    let pair = KeyPair::from_private_key(private_key, stored.created_at)?;
    if pair.public_key_pem.trim() != stored.public_key_pem.trim() {
        return Err(AppError::KeyFormat(
            "stored public key does not match private key".to_string(),
        ));
    }

    Ok(pair)
}
