//! End-to-end secret recovery
//!
//! Pulls every blob the caller may read from the registry, opens them with
//! the recovery key and interpolates the secret once `threshold` shares
//! survive. Blobs that fail their integrity check are dropped and reported
//! next to retrieval failures.

use crate::crypto::decrypt_share;
use crate::error::IndexFailure;
use crate::registry::ShareRegistry;
use crate::shamir::{reconstruct_secret, Share};
use crate::types::{Address, Secret};
use crate::{Error, Result};
use async_trait::async_trait;
use k256::SecretKey;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use tracing::{info, instrument, warn};

/// Source of the private key that opens an owner's blobs
#[async_trait]
pub trait RecoveryKeyProvider: Send + Sync + Debug {
    /// Key for the blobs of `owner`
    async fn recovery_key(&self, owner: &Address) -> Result<SecretKey>;
}

/// Provider holding keys in memory
#[derive(Default)]
pub struct StaticKeyProvider {
    keys: RwLock<HashMap<Address, SecretKey>>,
}

impl StaticKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider with a single key for `owner`
    pub fn with_key(owner: Address, key: SecretKey) -> Self {
        let provider = Self::new();
        provider.insert(owner, key);
        provider
    }

    pub fn insert(&self, owner: Address, key: SecretKey) {
        self.keys.write().insert(owner, key);
    }
}

impl Debug for StaticKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeyProvider")
            .field("owners", &self.keys.read().keys().collect::<Vec<_>>())
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl RecoveryKeyProvider for StaticKeyProvider {
    async fn recovery_key(&self, owner: &Address) -> Result<SecretKey> {
        self.keys
            .read()
            .get(owner)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no recovery key for {}", owner)))
    }
}

/// Recover the `len`-byte secret of `owner` as `caller`
///
/// The caller must be authorized for the owner's shares (the owner, or a
/// designated party whose recovery request has unlocked).
#[instrument(skip(registry, provider))]
pub async fn recover_secret(
    registry: &ShareRegistry,
    owner: Address,
    caller: Address,
    provider: &dyn RecoveryKeyProvider,
    len: usize,
) -> Result<Secret> {
    let config = registry
        .shamir_config(&owner)
        .await
        .filter(|c| c.active)
        .ok_or_else(|| Error::Lifecycle(format!("{} has no active configuration", owner)))?;
    let threshold = config.threshold;

    let indices: Vec<usize> = (0..config.total_shares).collect();
    let retrieved = registry
        .get_shares(owner, &indices, caller, threshold)
        .await?;

    let key = provider.recovery_key(&owner).await?;

    let mut failures = retrieved.failures;
    let mut shares: Vec<Share> = Vec::with_capacity(retrieved.shares.len());
    for (index, blob) in &retrieved.shares {
        match decrypt_share(&key, blob) {
            Ok(share) => shares.push(share),
            Err(e) => {
                warn!(owner = %owner, index, error = %e, "Discarding share that failed integrity check");
                failures.push(IndexFailure {
                    index: *index,
                    cause: e.to_string(),
                });
            }
        }
    }

    if shares.len() < threshold {
        return Err(Error::AggregateRetrieval {
            required: threshold,
            succeeded: shares.len(),
            failures,
        });
    }

    let secret = reconstruct_secret(&shares, threshold, len)?;
    info!(owner = %owner, caller = %caller, shares = shares.len(), "Secret recovered");
    Ok(secret)
}
