//! Durable registry state
//!
//! The registry does not own a storage engine. It writes configuration
//! records and audit events through [`RegistryStore`], an async interface to
//! an external durable, ordered, tamper-evident store. Writes may fail with
//! transient errors; the registry wraps them in bounded retries.
//!
//! [`MemoryRegistryStore`] keeps everything in process and can be told to
//! fail upcoming writes, which is how the retry path is exercised.

use crate::access::Authorization;
use crate::error::TransientKind;
use crate::types::{keccak256_concat, Address, CustodianId};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// One sharing configuration of an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirConfig {
    /// Owner of the secret
    pub owner: Address,
    /// Number of shares `N`
    pub total_shares: usize,
    /// Shares needed to reconstruct `T`
    pub threshold: usize,
    /// When the configuration was stored
    pub creation_time: DateTime<Utc>,
    /// Cleared by revoke; never set again
    pub active: bool,
    /// Custodian of each share, by index
    pub custodians: Vec<CustodianId>,
    /// 1 for the owner's first configuration, then counting up
    pub generation: u64,
    /// Tamper-evident hash, see [`ShamirConfig::compute_hash`]
    #[serde(with = "hex::serde")]
    pub config_hash: [u8; 32],
}

impl ShamirConfig {
    /// Build an active record and compute its hash
    pub fn new(
        owner: Address,
        threshold: usize,
        creation_time: DateTime<Utc>,
        custodians: Vec<CustodianId>,
        generation: u64,
    ) -> Self {
        let config_hash = Self::compute_hash(
            &owner,
            custodians.len(),
            threshold,
            creation_time,
            &custodians,
        );
        Self {
            owner,
            total_shares: custodians.len(),
            threshold,
            creation_time,
            active: true,
            custodians,
            generation,
            config_hash,
        }
    }

    /// `keccak256(owner || u32 N || u32 T || i64 creationTime || custodian ids...)`
    pub fn compute_hash(
        owner: &Address,
        total_shares: usize,
        threshold: usize,
        creation_time: DateTime<Utc>,
        custodians: &[CustodianId],
    ) -> [u8; 32] {
        let n = (total_shares as u32).to_be_bytes();
        let t = (threshold as u32).to_be_bytes();
        let ts = creation_time.timestamp().to_be_bytes();

        let mut parts: Vec<&[u8]> = Vec::with_capacity(4 + custodians.len());
        parts.push(owner.as_bytes());
        parts.push(&n);
        parts.push(&t);
        parts.push(&ts);
        parts.extend(custodians.iter().map(|c| c.as_bytes().as_slice()));
        keccak256_concat(&parts)
    }

    /// Whether the stored hash matches the record's fields
    pub fn verify_hash(&self) -> bool {
        let expected = Self::compute_hash(
            &self.owner,
            self.total_shares,
            self.threshold,
            self.creation_time,
            &self.custodians,
        );
        expected == self.config_hash && self.total_shares == self.custodians.len()
    }
}

/// State transitions recorded for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    SharesStored {
        owner: Address,
        total_shares: usize,
        threshold: usize,
        generation: u64,
        #[serde(with = "hex::serde")]
        config_hash: [u8; 32],
        fee_paid: u128,
        delegated: bool,
    },
    SharesRevoked {
        owner: Address,
        generation: u64,
    },
    ShareAccessed {
        owner: Address,
        index: usize,
        accessor: Address,
        authorization: Authorization,
    },
    RecoveryAddressAdded {
        owner: Address,
        address: Address,
    },
    RecoveryAddressRemoved {
        owner: Address,
        address: Address,
    },
    EmergencyContactSet {
        owner: Address,
        contact: Address,
    },
    EmergencyContactCleared {
        owner: Address,
    },
    RecoveryInitiated {
        owner: Address,
        initiator: Address,
        expires_at: DateTime<Utc>,
        #[serde(with = "hex::serde")]
        request_hash: [u8; 32],
    },
    RecoveryCancelled {
        owner: Address,
        cancelled_by: Address,
        administrative: bool,
    },
    AddressBlacklisted {
        address: Address,
    },
    AddressUnblacklisted {
        address: Address,
    },
    FeeExemptionChanged {
        address: Address,
        exempt: bool,
    },
    RequiredFeeChanged {
        fee: u128,
    },
    ThrottleReset {
        address: Address,
    },
}

impl AuditEvent {
    /// Owner the event concerns, if it is owner-scoped
    pub fn owner(&self) -> Option<&Address> {
        match self {
            AuditEvent::SharesStored { owner, .. }
            | AuditEvent::SharesRevoked { owner, .. }
            | AuditEvent::ShareAccessed { owner, .. }
            | AuditEvent::RecoveryAddressAdded { owner, .. }
            | AuditEvent::RecoveryAddressRemoved { owner, .. }
            | AuditEvent::EmergencyContactSet { owner, .. }
            | AuditEvent::EmergencyContactCleared { owner }
            | AuditEvent::RecoveryInitiated { owner, .. }
            | AuditEvent::RecoveryCancelled { owner, .. } => Some(owner),
            AuditEvent::AddressBlacklisted { .. }
            | AuditEvent::AddressUnblacklisted { .. }
            | AuditEvent::FeeExemptionChanged { .. }
            | AuditEvent::RequiredFeeChanged { .. }
            | AuditEvent::ThrottleReset { .. } => None,
        }
    }
}

/// An audit event with its position and time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the log, assigned by the store
    pub sequence: u64,
    /// When the transition happened
    pub at: DateTime<Utc>,
    /// Address that caused it
    pub actor: Address,
    /// What happened
    pub event: AuditEvent,
}

/// External durable, ordered store for registry state
#[async_trait]
pub trait RegistryStore: Send + Sync + Debug {
    /// Write the owner's current configuration record
    async fn put_config(&self, config: &ShamirConfig) -> Result<()>;

    /// Read the owner's current configuration record
    async fn get_config(&self, owner: &Address) -> Result<Option<ShamirConfig>>;

    /// Append an audit event; returns its sequence number
    async fn append_audit(&self, at: DateTime<Utc>, actor: Address, event: AuditEvent) -> Result<u64>;

    /// Audit log, optionally only events concerning `owner`
    async fn audit_log(&self, owner: Option<&Address>) -> Result<Vec<AuditRecord>>;
}

/// In-process store for tests and simulations
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    configs: Arc<RwLock<HashMap<Address, ShamirConfig>>>,
    audit: Arc<RwLock<Vec<AuditRecord>>>,
    pending_failures: AtomicU32,
    failure_kind: Mutex<Option<TransientKind>>,
}

impl MemoryRegistryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes fail with a transient error of `kind`
    pub fn fail_next_writes(&self, count: u32, kind: TransientKind) {
        *self.failure_kind.lock() = Some(kind);
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Result<()> {
        let remaining = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => {
                let kind = (*self.failure_kind.lock()).unwrap_or(TransientKind::Network);
                Err(Error::transient(kind, "injected store failure"))
            }
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn put_config(&self, config: &ShamirConfig) -> Result<()> {
        self.injected_failure()?;
        let mut configs = self.configs.write().await;
        configs.insert(config.owner, config.clone());
        Ok(())
    }

    async fn get_config(&self, owner: &Address) -> Result<Option<ShamirConfig>> {
        let configs = self.configs.read().await;
        Ok(configs.get(owner).cloned())
    }

    async fn append_audit(&self, at: DateTime<Utc>, actor: Address, event: AuditEvent) -> Result<u64> {
        self.injected_failure()?;
        let mut audit = self.audit.write().await;
        let sequence = audit.len() as u64;
        info!(sequence, actor = %actor, event = ?event, "Audit event");
        audit.push(AuditRecord {
            sequence,
            at,
            actor,
            event,
        });
        Ok(sequence)
    }

    async fn audit_log(&self, owner: Option<&Address>) -> Result<Vec<AuditRecord>> {
        let audit = self.audit.read().await;
        Ok(audit
            .iter()
            .filter(|r| owner.map_or(true, |o| r.event.owner() == Some(o)))
            .cloned()
            .collect())
    }
}
