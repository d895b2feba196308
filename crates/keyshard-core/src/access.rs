//! Access control for share retrieval
//!
//! Custodians never decide on their own who besides the owner may read a
//! share. They are handed an [`AccessPolicy`] and ask it. The registry's
//! policy is the [`RecoveryDirectory`]: per-owner recovery addresses, an
//! optional emergency contact and at most one time-locked recovery request.
//!
//! ## Authorization rule
//!
//! | Accessor                        | Before time lock | After time lock           |
//! |---------------------------------|------------------|---------------------------|
//! | owner                           | `Owner`          | `Owner`                   |
//! | initiator of the active request | `Denied`         | `ExpiredRecoveryInitiator`|
//! | other recovery address          | `Denied`         | `RecoveryAddress`         |
//! | emergency contact               | `Denied`         | `EmergencyContact`        |
//! | anyone else                     | `Denied`         | `Denied`                  |
//!
//! Designated parties only gain access through an active recovery request
//! whose lock has elapsed, which gives the owner the whole lock period to
//! cancel.

use crate::types::{keccak256_concat, Address};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use tracing::{debug, info};

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    /// Accessor owns the shares
    Owner,
    /// Registered recovery address, recovery unlocked
    RecoveryAddress,
    /// Emergency contact, recovery unlocked
    EmergencyContact,
    /// Initiator of an active request whose time lock has elapsed
    ExpiredRecoveryInitiator,
    /// No access
    Denied,
}

impl Authorization {
    /// Whether access is granted
    pub fn is_granted(&self) -> bool {
        !matches!(self, Authorization::Denied)
    }

    /// Whether the accessor is the owner
    pub fn is_owner(&self) -> bool {
        matches!(self, Authorization::Owner)
    }
}

/// Capability check injected into every custodian
pub trait AccessPolicy: Send + Sync + Debug {
    /// Classify `accessor` with respect to `owner`'s shares at time `now`
    fn authorize(&self, owner: &Address, accessor: &Address, now: DateTime<Utc>) -> Authorization;
}

/// A time-locked recovery request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Party that opened the request
    pub initiator: Address,
    /// When it was opened
    pub request_time: DateTime<Utc>,
    /// When recovery access begins
    pub expires_at: DateTime<Utc>,
    /// Keccak-256 over owner, initiator, request time and nonce
    #[serde(with = "hex::serde")]
    pub request_hash: [u8; 32],
    /// Cleared by cancellation, override or a superseding revoke
    pub active: bool,
}

impl RecoveryRequest {
    /// Hash binding a request to its owner, initiator, time and nonce
    pub fn compute_hash(
        owner: &Address,
        initiator: &Address,
        request_time: DateTime<Utc>,
        nonce: u64,
    ) -> [u8; 32] {
        keccak256_concat(&[
            owner.as_bytes(),
            initiator.as_bytes(),
            &request_time.timestamp().to_be_bytes(),
            &nonce.to_be_bytes(),
        ])
    }

    /// Active and past its time lock
    pub fn is_unlocked(&self, now: DateTime<Utc>) -> bool {
        self.active && now >= self.expires_at
    }

    /// Seconds until the lock elapses (0 once unlocked)
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

#[derive(Debug, Default)]
struct OwnerRecovery {
    recovery_addresses: Vec<Address>,
    emergency_contact: Option<Address>,
    request: Option<RecoveryRequest>,
    request_nonce: u64,
}

/// Per-owner recovery designations and requests
#[derive(Debug)]
pub struct RecoveryDirectory {
    owners: RwLock<HashMap<Address, OwnerRecovery>>,
    max_recovery_addresses: usize,
    time_lock: Duration,
}

impl RecoveryDirectory {
    /// Create an empty directory
    pub fn new(max_recovery_addresses: usize, time_lock: Duration) -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
            max_recovery_addresses,
            time_lock,
        }
    }

    /// Recovery time lock
    pub fn time_lock(&self) -> Duration {
        self.time_lock
    }

    // ========================================================================
    // Recovery addresses
    // ========================================================================

    /// Register a recovery address for `owner`
    pub fn add_recovery_address(&self, owner: &Address, address: Address) -> Result<()> {
        if address.is_zero() {
            return Err(Error::Validation("recovery address must not be zero".into()));
        }
        if address == *owner {
            return Err(Error::Validation(
                "owner cannot be its own recovery address".into(),
            ));
        }

        let mut owners = self.owners.write();
        let entry = owners.entry(*owner).or_default();

        if entry.recovery_addresses.contains(&address) {
            return Err(Error::Validation(format!(
                "{} is already a recovery address",
                address
            )));
        }
        if entry.recovery_addresses.len() >= self.max_recovery_addresses {
            return Err(Error::Validation(format!(
                "at most {} recovery addresses allowed",
                self.max_recovery_addresses
            )));
        }

        entry.recovery_addresses.push(address);
        debug!(owner = %owner, address = %address, "Recovery address added");
        Ok(())
    }

    /// Remove a recovery address
    pub fn remove_recovery_address(&self, owner: &Address, address: &Address) -> Result<()> {
        let mut owners = self.owners.write();
        let entry = owners
            .get_mut(owner)
            .ok_or_else(|| Error::NotFound(format!("{} is not a recovery address", address)))?;

        let position = entry
            .recovery_addresses
            .iter()
            .position(|a| a == address)
            .ok_or_else(|| Error::NotFound(format!("{} is not a recovery address", address)))?;
        entry.recovery_addresses.remove(position);

        debug!(owner = %owner, address = %address, "Recovery address removed");
        Ok(())
    }

    /// Recovery addresses of `owner`, in registration order
    pub fn recovery_addresses(&self, owner: &Address) -> Vec<Address> {
        self.owners
            .read()
            .get(owner)
            .map(|e| e.recovery_addresses.clone())
            .unwrap_or_default()
    }

    /// Whether `address` is a recovery address of `owner`
    pub fn is_recovery_address(&self, owner: &Address, address: &Address) -> bool {
        self.owners
            .read()
            .get(owner)
            .map(|e| e.recovery_addresses.contains(address))
            .unwrap_or(false)
    }

    // ========================================================================
    // Emergency contact
    // ========================================================================

    /// Designate the emergency contact, returning the one it replaces
    pub fn set_emergency_contact(&self, owner: &Address, contact: Address) -> Result<Option<Address>> {
        if contact.is_zero() {
            return Err(Error::Validation("emergency contact must not be zero".into()));
        }
        if contact == *owner {
            return Err(Error::Validation(
                "owner cannot be its own emergency contact".into(),
            ));
        }

        let mut owners = self.owners.write();
        let entry = owners.entry(*owner).or_default();
        Ok(entry.emergency_contact.replace(contact))
    }

    /// Remove the emergency contact
    pub fn clear_emergency_contact(&self, owner: &Address) -> Result<Address> {
        self.owners
            .write()
            .get_mut(owner)
            .and_then(|e| e.emergency_contact.take())
            .ok_or_else(|| Error::NotFound("no emergency contact set".into()))
    }

    /// Current emergency contact
    pub fn emergency_contact(&self, owner: &Address) -> Option<Address> {
        self.owners.read().get(owner).and_then(|e| e.emergency_contact)
    }

    // ========================================================================
    // Recovery requests
    // ========================================================================

    /// Open a time-locked recovery request
    ///
    /// The initiator must be the emergency contact or a recovery address, and
    /// no other request may be active.
    pub fn initiate_recovery(
        &self,
        owner: &Address,
        initiator: Address,
        now: DateTime<Utc>,
    ) -> Result<RecoveryRequest> {
        let mut owners = self.owners.write();
        let entry = owners
            .get_mut(owner)
            .ok_or_else(|| Error::Unauthorized(format!("{} has no recovery designees", owner)))?;

        let designated = entry.emergency_contact == Some(initiator)
            || entry.recovery_addresses.contains(&initiator);
        if !designated {
            return Err(Error::Unauthorized(format!(
                "{} is neither a recovery address nor the emergency contact",
                initiator
            )));
        }

        if let Some(existing) = entry.request.as_ref().filter(|r| r.active) {
            return Err(Error::RecoveryConflict(format!(
                "request by {} is already active",
                existing.initiator
            )));
        }

        let nonce = entry.request_nonce;
        entry.request_nonce += 1;

        let request = RecoveryRequest {
            initiator,
            request_time: now,
            expires_at: now + self.time_lock,
            request_hash: RecoveryRequest::compute_hash(owner, &initiator, now, nonce),
            active: true,
        };
        entry.request = Some(request.clone());

        info!(
            owner = %owner,
            initiator = %initiator,
            expires_at = %request.expires_at,
            "Recovery request opened"
        );
        Ok(request)
    }

    /// Cancel the active request
    ///
    /// Allowed for the owner, the initiator, or when `administrative` is set.
    pub fn cancel_recovery(
        &self,
        owner: &Address,
        caller: &Address,
        administrative: bool,
    ) -> Result<RecoveryRequest> {
        let mut owners = self.owners.write();
        let request = owners
            .get_mut(owner)
            .and_then(|e| e.request.as_mut())
            .filter(|r| r.active)
            .ok_or_else(|| Error::NotFound("no active recovery request".into()))?;

        if !(administrative || caller == owner || *caller == request.initiator) {
            return Err(Error::Unauthorized(format!(
                "{} may not cancel this recovery request",
                caller
            )));
        }

        request.active = false;
        info!(owner = %owner, cancelled_by = %caller, administrative, "Recovery request cancelled");
        Ok(request.clone())
    }

    /// Deactivate any active request, e.g. when the configuration it targets is revoked
    pub(crate) fn close_recovery(&self, owner: &Address) -> Option<RecoveryRequest> {
        let mut owners = self.owners.write();
        let request = owners
            .get_mut(owner)
            .and_then(|e| e.request.as_mut())
            .filter(|r| r.active)?;
        request.active = false;
        Some(request.clone())
    }

    /// Active request for `owner`, if any
    pub fn active_recovery(&self, owner: &Address) -> Option<RecoveryRequest> {
        self.owners
            .read()
            .get(owner)
            .and_then(|e| e.request.clone())
            .filter(|r| r.active)
    }

    /// Whether `initiator` holds an active request for `owner` whose lock has elapsed
    pub fn recovery_unlocked(&self, owner: &Address, initiator: &Address, now: DateTime<Utc>) -> bool {
        self.active_recovery(owner)
            .map(|r| r.initiator == *initiator && r.is_unlocked(now))
            .unwrap_or(false)
    }
}

impl AccessPolicy for RecoveryDirectory {
    fn authorize(&self, owner: &Address, accessor: &Address, now: DateTime<Utc>) -> Authorization {
        if accessor == owner {
            return Authorization::Owner;
        }

        let owners = self.owners.read();
        let Some(entry) = owners.get(owner) else {
            return Authorization::Denied;
        };
        let Some(request) = entry.request.as_ref().filter(|r| r.is_unlocked(now)) else {
            return Authorization::Denied;
        };

        if request.initiator == *accessor {
            Authorization::ExpiredRecoveryInitiator
        } else if entry.recovery_addresses.contains(accessor) {
            Authorization::RecoveryAddress
        } else if entry.emergency_contact == Some(*accessor) {
            Authorization::EmergencyContact
        } else {
            Authorization::Denied
        }
    }
}
