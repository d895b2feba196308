//! Share custodians
//!
//! A custodian is the smallest access-controlled unit: it holds exactly one
//! encrypted share for one owner. It knows the owner and the registry that
//! created it. Every other caller is checked against the injected
//! [`AccessPolicy`] and limited to one read per access interval.

use crate::access::{AccessPolicy, Authorization};
use crate::crypto::EncryptedShare;
use crate::types::{keccak256_concat, Address, CustodianId};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Custodian identity and position, as returned by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CustodianHandle {
    /// Custodian identifier
    pub id: CustodianId,
    /// Zero-based position within the configuration
    pub index: usize,
}

/// One encrypted share under access control
#[derive(Debug)]
pub struct ShareCustodian {
    id: CustodianId,
    index: usize,
    owner: Address,
    registry: Address,
    active: bool,
    payload: EncryptedShare,
    last_access: HashMap<Address, DateTime<Utc>>,
    access_count: u64,
    policy: Arc<dyn AccessPolicy>,
    access_interval: Duration,
}

impl ShareCustodian {
    /// Create an active custodian
    pub fn new(
        index: usize,
        generation: u64,
        owner: Address,
        registry: Address,
        payload: EncryptedShare,
        policy: Arc<dyn AccessPolicy>,
        access_interval: Duration,
    ) -> Self {
        Self {
            id: Self::derive_id(&owner, generation, index),
            index,
            owner,
            registry,
            active: true,
            payload,
            last_access: HashMap::new(),
            access_count: 0,
            policy,
            access_interval,
        }
    }

    /// Identifier of the custodian at `index` in `owner`'s `generation`-th configuration
    pub fn derive_id(owner: &Address, generation: u64, index: usize) -> CustodianId {
        let digest = keccak256_concat(&[
            owner.as_bytes(),
            &generation.to_be_bytes(),
            &(index as u32).to_be_bytes(),
        ]);
        Address::from_digest(&digest)
    }

    /// Custodian identifier
    pub fn id(&self) -> CustodianId {
        self.id
    }

    /// Position within the configuration
    pub fn index(&self) -> usize {
        self.index
    }

    /// Handle for callers
    pub fn handle(&self) -> CustodianHandle {
        CustodianHandle {
            id: self.id,
            index: self.index,
        }
    }

    /// Owner of the share
    pub fn owner(&self) -> &Address {
        &self.owner
    }

    /// Whether the custodian still serves its share
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Successful reads so far
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    /// Last successful read by `caller`
    pub fn last_access(&self, caller: &Address) -> Option<DateTime<Utc>> {
        self.last_access.get(caller).copied()
    }

    /// Return the encrypted share to an authorized caller
    pub fn get_share(
        &mut self,
        caller: &Address,
        now: DateTime<Utc>,
    ) -> Result<(EncryptedShare, Authorization)> {
        if !self.active {
            return Err(Error::InactiveCustodian(self.index));
        }

        let authorization = self.policy.authorize(&self.owner, caller, now);
        if !authorization.is_granted() {
            return Err(Error::Unauthorized(format!(
                "{} may not read share {} of {}",
                caller, self.index, self.owner
            )));
        }

        if !authorization.is_owner() {
            if let Some(last) = self.last_access.get(caller) {
                let next_allowed = *last + self.access_interval;
                if now < next_allowed {
                    return Err(Error::RateLimited {
                        retry_after_secs: (next_allowed - now).num_seconds().max(1),
                    });
                }
            }
        }

        self.last_access.insert(*caller, now);
        self.access_count += 1;

        debug!(
            owner = %self.owner,
            index = self.index,
            caller = %caller,
            authorization = ?authorization,
            "Share read"
        );
        Ok((self.payload.clone(), authorization))
    }

    /// Replace the payload (owner or registry only)
    pub fn update_share(&mut self, caller: &Address, payload: EncryptedShare) -> Result<()> {
        self.require_controller(caller)?;
        if !self.active {
            return Err(Error::InactiveCustodian(self.index));
        }
        self.payload = payload;
        Ok(())
    }

    /// Stop serving the share (owner or registry only)
    pub fn deactivate(&mut self, caller: &Address) -> Result<()> {
        self.require_controller(caller)?;
        self.active = false;
        Ok(())
    }

    fn require_controller(&self, caller: &Address) -> Result<()> {
        if *caller == self.owner || *caller == self.registry {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "{} does not control custodian {}",
                caller, self.id
            )))
        }
    }
}
