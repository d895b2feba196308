//! # Keyshard Core
//!
//! Threshold backup and time-locked recovery of secp256k1 private keys.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Shamir Sharing**: `t`-of-`n` splitting over the secp256k1 scalar field
//! - **Share Sealing**: ECIES (ECDH + HKDF-SHA256 + AES-256-GCM) per share
//! - **Custodians**: one guarded holder per encrypted share
//! - **Share Registry**: configuration lifecycle, recovery designations,
//!   48-hour recovery time lock, throttling, blacklist and fees
//! - **Delegated Stores**: signed authorization for third-party submission
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keyshard_core::{encrypt_share, split, RegistryConfig, Secret, ShareRegistry};
//!
//! let shares = split(&Secret::new(private_key_bytes), 5, 3)?;
//! let blobs = shares
//!     .iter()
//!     .map(|s| encrypt_share(&owner_public_key, s))
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! let registry = ShareRegistry::new(RegistryConfig::default())?;
//! registry.store(owner, blobs, 3, 0).await?;
//!
//! let secret = recover_secret(&registry, owner, owner, &provider, 32).await?;
//! ```
//!
//! ## Security Model
//!
//! - Fewer than `t` shares reveal nothing about the secret
//! - Every blob is authenticated; a flipped bit fails with an integrity error
//! - Designated parties read shares only after their recovery request has
//!   been open for the full time lock, and only if nobody cancelled it

pub mod abuse;
pub mod access;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod custodian;
pub mod delegation;
pub mod error;
pub mod field;
pub mod shamir;
pub mod types;

// Runtime-dependent modules (require tokio)
#[cfg(feature = "runtime")]
pub mod fees;
#[cfg(feature = "runtime")]
pub mod recovery;
#[cfg(feature = "runtime")]
pub mod registry;
#[cfg(feature = "runtime")]
pub mod retry;
#[cfg(feature = "runtime")]
pub mod store;

pub use access::{AccessPolicy, Authorization, RecoveryDirectory, RecoveryRequest};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RegistryConfig, RetryConfig};
pub use crypto::{decrypt_share, encrypt_share, EncryptedShare};
pub use custodian::{CustodianHandle, ShareCustodian};
pub use delegation::{DelegatedStore, DelegationSignature};
pub use error::{Error, ErrorKind, IndexFailure, Result, TransientKind};
pub use shamir::{reconstruct, reconstruct_secret, split, split_with_entropy, ExtraEntropy, Share};
pub use types::{keccak256, Address, CustodianId, Secret};

#[cfg(feature = "runtime")]
pub use fees::{FeeCollector, FeeTransfer, MemoryFeeCollector, TransferKind};
#[cfg(feature = "runtime")]
pub use recovery::{recover_secret, RecoveryKeyProvider, StaticKeyProvider};
#[cfg(feature = "runtime")]
pub use registry::{RetrievedShares, ShareRegistry};
#[cfg(feature = "runtime")]
pub use store::{AuditEvent, AuditRecord, MemoryRegistryStore, RegistryStore, ShamirConfig};
