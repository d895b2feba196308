//! Share registry
//!
//! Orchestrates the custodians of every owner:
//!
//! ```text
//! NoConfig ──store──▶ Active ──revoke──▶ Revoked ──store──▶ Active (next generation)
//! ```
//!
//! Alongside the configuration lifecycle it manages recovery addresses, the
//! emergency contact, time-locked recovery requests and abuse controls.
//!
//! ## Serialization
//!
//! Every owner has a `tokio::sync::Mutex<OwnerState>`; each state-changing
//! call holds it for its whole duration, including the awaits on the external
//! store, so `store`, `revoke_shares` and `initiate_recovery` on one owner
//! never interleave. Different owners proceed in parallel.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keyshard_core::{registry::ShareRegistry, RegistryConfig};
//!
//! let registry = ShareRegistry::new(RegistryConfig::default())?;
//! let handles = registry.store(owner, blobs, 3, 0).await?;
//! let blob = registry.get_share(owner, 0, owner).await?;
//! ```

use crate::abuse::AbuseGuard;
use crate::access::{AccessPolicy, Authorization, RecoveryDirectory, RecoveryRequest};
use crate::clock::{Clock, SystemClock};
use crate::config::RegistryConfig;
use crate::crypto::EncryptedShare;
use crate::custodian::{CustodianHandle, ShareCustodian};
use crate::delegation::DelegatedStore;
use crate::error::IndexFailure;
use crate::fees::{FeeCollector, MemoryFeeCollector};
use crate::retry::{confirm, with_retry};
use crate::shamir::validate_parameters;
use crate::store::{AuditEvent, AuditRecord, MemoryRegistryStore, RegistryStore, ShamirConfig};
use crate::types::Address;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Registry state of one owner
#[derive(Debug, Default)]
struct OwnerState {
    generation: u64,
    config: Option<ShamirConfig>,
    custodians: Vec<ShareCustodian>,
    delegation_nonce: u64,
}

impl OwnerState {
    fn active_config(&self) -> Option<&ShamirConfig> {
        self.config.as_ref().filter(|c| c.active)
    }
}

/// Result of a best-effort multi-share retrieval
#[derive(Debug, Clone)]
pub struct RetrievedShares {
    /// Successfully fetched blobs with their custodian index
    pub shares: Vec<(usize, EncryptedShare)>,
    /// Indices that could not be fetched
    pub failures: Vec<IndexFailure>,
}

/// Registry of share configurations
#[derive(Debug)]
pub struct ShareRegistry {
    config: RegistryConfig,
    store: Arc<dyn RegistryStore>,
    fees: Arc<dyn FeeCollector>,
    clock: Arc<dyn Clock>,
    directory: Arc<RecoveryDirectory>,
    abuse: AbuseGuard,
    owners: DashMap<Address, Arc<Mutex<OwnerState>>>,
    registry_access: DashMap<(Address, Address), DateTime<Utc>>,
}

impl ShareRegistry {
    /// Create a registry backed by in-memory store and fee collector
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;

        let directory = Arc::new(RecoveryDirectory::new(
            config.max_recovery_addresses,
            config.recovery_time_lock(),
        ));

        Ok(Self {
            abuse: AbuseGuard::from_config(&config),
            store: Arc::new(MemoryRegistryStore::new()),
            fees: Arc::new(MemoryFeeCollector::new()),
            clock: Arc::new(SystemClock),
            directory,
            owners: DashMap::new(),
            registry_access: DashMap::new(),
            config,
        })
    }

    /// Use a different durable store
    pub fn with_store(mut self, store: Arc<dyn RegistryStore>) -> Self {
        self.store = store;
        self
    }

    /// Use a different payment mechanism
    pub fn with_fee_collector(mut self, fees: Arc<dyn FeeCollector>) -> Self {
        self.fees = fees;
        self
    }

    /// Use a different clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Address the registry acts under
    pub fn address(&self) -> Address {
        self.config.registry_address
    }

    // ========================================================================
    // Configuration lifecycle
    // ========================================================================

    /// Store a new sharing configuration for `caller`
    ///
    /// Creates one custodian per blob and returns their handles in index
    /// order. `fee_paid` is forwarded to the fee collector and refunded if
    /// the configuration cannot be persisted.
    #[instrument(skip(self, shares), fields(count = shares.len()))]
    pub async fn store(
        &self,
        caller: Address,
        shares: Vec<EncryptedShare>,
        threshold: usize,
        fee_paid: u128,
    ) -> Result<Vec<CustodianHandle>> {
        let now = self.clock.now();
        self.abuse.check(&caller, now)?;

        let lock = self.owner_lock(&caller);
        let mut state = lock.lock().await;

        let result = self
            .store_locked(&mut state, caller, caller, shares, threshold, fee_paid, now, false)
            .await;
        self.record_outcome(&caller, now, &result);
        result
    }

    /// Store on the owner's behalf, authorized by the owner's signature
    ///
    /// The submitter pays the fee, so the submitter's exemption decides
    /// whether one is due. The owner's exemption does not carry over.
    #[instrument(skip(self, delegation, shares), fields(owner = %delegation.owner, count = shares.len()))]
    pub async fn store_delegated(
        &self,
        submitter: Address,
        delegation: DelegatedStore,
        shares: Vec<EncryptedShare>,
        threshold: usize,
        fee_paid: u128,
    ) -> Result<Vec<CustodianHandle>> {
        let now = self.clock.now();
        let owner = delegation.owner;
        self.abuse.check(&submitter, now)?;
        self.abuse.ensure_not_blacklisted(&owner)?;
        self.abuse.ensure_not_locked(&owner, now)?;

        let lock = self.owner_lock(&owner);
        let mut state = lock.lock().await;

        let result: Result<Vec<CustodianHandle>> = async {
            if now > delegation.deadline {
                return Err(Error::Validation(format!(
                    "delegation expired at {}",
                    delegation.deadline
                )));
            }
            if delegation.nonce != state.delegation_nonce {
                return Err(Error::Validation(format!(
                    "delegation nonce {} does not match current nonce {}",
                    delegation.nonce, state.delegation_nonce
                )));
            }
            delegation.verify_signer(&self.config.registry_address, &shares, threshold)?;

            let handles = self
                .store_locked(&mut state, owner, submitter, shares, threshold, fee_paid, now, true)
                .await?;
            state.delegation_nonce += 1;
            Ok(handles)
        }
        .await;

        self.record_outcome(&submitter, now, &result);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_locked(
        &self,
        state: &mut OwnerState,
        owner: Address,
        payer: Address,
        shares: Vec<EncryptedShare>,
        threshold: usize,
        fee_paid: u128,
        now: DateTime<Utc>,
        delegated: bool,
    ) -> Result<Vec<CustodianHandle>> {
        if state.active_config().is_some() {
            return Err(Error::Lifecycle(format!(
                "{} already has an active configuration",
                owner
            )));
        }

        let count = shares.len();
        if count < self.config.min_shares || count > self.config.max_shares {
            return Err(Error::Validation(format!(
                "share count must be {}..={}, got {}",
                self.config.min_shares, self.config.max_shares, count
            )));
        }
        validate_parameters(count, threshold)?;
        if let Some(index) = shares.iter().position(EncryptedShare::is_empty) {
            return Err(Error::Validation(format!("share {} has no ciphertext", index)));
        }

        let due = self.abuse.fee_due(&payer);
        if fee_paid < due {
            return Err(Error::InsufficientFee {
                required: due,
                paid: fee_paid,
            });
        }

        let generation = state.generation + 1;
        let policy: Arc<dyn AccessPolicy> = self.directory.clone();
        let custodians: Vec<ShareCustodian> = shares
            .into_iter()
            .enumerate()
            .map(|(index, blob)| {
                ShareCustodian::new(
                    index,
                    generation,
                    owner,
                    self.config.registry_address,
                    blob,
                    Arc::clone(&policy),
                    self.config.custodian_access_interval(),
                )
            })
            .collect();
        let handles: Vec<CustodianHandle> = custodians.iter().map(ShareCustodian::handle).collect();
        let record = ShamirConfig::new(
            owner,
            threshold,
            now,
            handles.iter().map(|h| h.id).collect(),
            generation,
        );

        let collector = self.config.fee_collector;
        if fee_paid > 0 {
            with_retry(&self.config.retry, "forward_fee", || {
                self.fees.forward(&payer, &collector, fee_paid)
            })
            .await?;
        }

        if let Err(e) = self.persist_config(&record).await {
            if fee_paid > 0 {
                self.refund_fee(&collector, &payer, fee_paid).await;
            }
            return Err(e);
        }

        let config_hash = record.config_hash;
        state.generation = generation;
        state.config = Some(record);
        state.custodians = custodians;

        info!(
            owner = %owner,
            total_shares = count,
            threshold,
            generation,
            delegated,
            "Shares stored"
        );

        self.audit(
            payer,
            AuditEvent::SharesStored {
                owner,
                total_shares: count,
                threshold,
                generation,
                config_hash,
                fee_paid,
                delegated,
            },
        )
        .await;

        Ok(handles)
    }

    /// Deactivate every custodian of the caller's active configuration
    ///
    /// Irreversible for that generation. An open recovery request is closed
    /// with it.
    #[instrument(skip(self))]
    pub async fn revoke_shares(&self, caller: Address) -> Result<()> {
        self.abuse.ensure_not_blacklisted(&caller)?;

        let lock = self.existing_owner(&caller)?;
        let mut state = lock.lock().await;

        let mut record = state
            .active_config()
            .cloned()
            .ok_or_else(|| Error::Lifecycle(format!("{} has no active configuration", caller)))?;
        record.active = false;
        self.persist_config(&record).await?;

        let registry = self.config.registry_address;
        for custodian in state.custodians.iter_mut() {
            custodian.deactivate(&registry)?;
        }
        let generation = record.generation;
        state.config = Some(record);

        info!(owner = %caller, generation, "Shares revoked");

        if let Some(request) = self.directory.close_recovery(&caller) {
            debug!(owner = %caller, initiator = %request.initiator, "Recovery request closed by revoke");
            self.audit(
                caller,
                AuditEvent::RecoveryCancelled {
                    owner: caller,
                    cancelled_by: caller,
                    administrative: false,
                },
            )
            .await;
        }

        self.audit(caller, AuditEvent::SharesRevoked { owner: caller, generation })
            .await;
        Ok(())
    }

    /// Current configuration record of `owner`, active or revoked
    pub async fn shamir_config(&self, owner: &Address) -> Option<ShamirConfig> {
        let lock = self.owners.get(owner).map(|e| Arc::clone(e.value()))?;
        let state = lock.lock().await;
        state.config.clone()
    }

    /// Custodian handles of `owner`'s current configuration
    pub async fn custodians(&self, owner: &Address) -> Vec<CustodianHandle> {
        let Some(lock) = self.owners.get(owner).map(|e| Arc::clone(e.value())) else {
            return Vec::new();
        };
        let state = lock.lock().await;
        state.custodians.iter().map(ShareCustodian::handle).collect()
    }

    /// Nonce the next delegated store for `owner` must carry
    pub async fn delegation_nonce(&self, owner: &Address) -> u64 {
        match self.owners.get(owner).map(|e| Arc::clone(e.value())) {
            Some(lock) => lock.lock().await.delegation_nonce,
            None => 0,
        }
    }

    /// Recompute the stored configuration hash and compare it with live state
    pub async fn verify_config_hash(&self, owner: &Address) -> Result<bool> {
        let stored = with_retry(&self.config.retry, "get_config", || self.store.get_config(owner))
            .await?
            .ok_or_else(|| Error::NotFound(format!("no configuration stored for {}", owner)))?;

        let live = self.shamir_config(owner).await;
        Ok(stored.verify_hash() && live.as_ref() == Some(&stored))
    }

    // ========================================================================
    // Share retrieval
    // ========================================================================

    /// Fetch the blob at `index` of `owner`'s configuration
    #[instrument(skip(self))]
    pub async fn get_share(
        &self,
        owner: Address,
        index: usize,
        caller: Address,
    ) -> Result<EncryptedShare> {
        let now = self.clock.now();
        self.pre_read_checks(&owner, &caller, now)?;

        let lock = self.existing_owner(&owner)?;
        let mut state = lock.lock().await;

        match Self::read_share(&mut state, index, &caller, now) {
            Ok((blob, authorization)) => {
                self.mark_registry_access(&owner, &caller, now);
                self.audit(
                    caller,
                    AuditEvent::ShareAccessed {
                        owner,
                        index,
                        accessor: caller,
                        authorization,
                    },
                )
                .await;
                Ok(blob)
            }
            Err(e) => {
                if e.counts_as_failure() {
                    self.abuse.record_failure(&caller, now);
                }
                debug!(owner = %owner, index, caller = %caller, error = %e, "Share read refused");
                Err(e)
            }
        }
    }

    /// Fetch several indices in one registry access
    ///
    /// Best effort: individual failures are collected and the call succeeds
    /// as long as at least `required` blobs were fetched. Otherwise the
    /// error lists every per-index cause.
    #[instrument(skip(self, indices), fields(count = indices.len()))]
    pub async fn get_shares(
        &self,
        owner: Address,
        indices: &[usize],
        caller: Address,
        required: usize,
    ) -> Result<RetrievedShares> {
        let now = self.clock.now();
        self.pre_read_checks(&owner, &caller, now)?;

        let lock = self.existing_owner(&owner)?;
        let mut state = lock.lock().await;

        let mut shares = Vec::with_capacity(indices.len());
        let mut failures = Vec::new();
        let mut counted_failure = false;

        for &index in indices {
            match Self::read_share(&mut state, index, &caller, now) {
                Ok((blob, authorization)) => {
                    self.audit(
                        caller,
                        AuditEvent::ShareAccessed {
                            owner,
                            index,
                            accessor: caller,
                            authorization,
                        },
                    )
                    .await;
                    shares.push((index, blob));
                }
                Err(e) => {
                    counted_failure |= e.counts_as_failure();
                    failures.push(IndexFailure {
                        index,
                        cause: e.to_string(),
                    });
                }
            }
        }

        if !shares.is_empty() {
            self.mark_registry_access(&owner, &caller, now);
        }
        if counted_failure && shares.is_empty() {
            self.abuse.record_failure(&caller, now);
        }

        if shares.len() < required {
            warn!(
                owner = %owner,
                required,
                succeeded = shares.len(),
                failed = failures.len(),
                "Not enough shares retrieved"
            );
            return Err(Error::AggregateRetrieval {
                required,
                succeeded: shares.len(),
                failures,
            });
        }

        Ok(RetrievedShares { shares, failures })
    }

    fn read_share(
        state: &mut OwnerState,
        index: usize,
        caller: &Address,
        now: DateTime<Utc>,
    ) -> Result<(EncryptedShare, Authorization)> {
        let total = state
            .config
            .as_ref()
            .map(|c| c.total_shares)
            .ok_or_else(|| Error::Lifecycle("no configuration stored".into()))?;
        if index >= total {
            return Err(Error::Validation(format!(
                "share index {} out of range (total {})",
                index, total
            )));
        }
        state.custodians[index].get_share(caller, now)
    }

    fn pre_read_checks(&self, owner: &Address, caller: &Address, now: DateTime<Utc>) -> Result<()> {
        self.abuse.ensure_not_blacklisted(caller)?;
        if caller == owner {
            return Ok(());
        }
        self.abuse.ensure_not_locked(caller, now)?;

        if let Some(last) = self.registry_access.get(&(*owner, *caller)).map(|e| *e.value()) {
            let next_allowed = last + self.config.registry_access_interval();
            if now < next_allowed {
                return Err(Error::RateLimited {
                    retry_after_secs: (next_allowed - now).num_seconds().max(1),
                });
            }
        }
        Ok(())
    }

    fn mark_registry_access(&self, owner: &Address, caller: &Address, now: DateTime<Utc>) {
        if owner != caller {
            let interval = self.config.registry_access_interval();
            self.registry_access.retain(|_, last| now < *last + interval);
            self.registry_access.insert((*owner, *caller), now);
        }
    }

    // ========================================================================
    // Recovery designations
    // ========================================================================

    /// Register a recovery address for the caller
    #[instrument(skip(self))]
    pub async fn add_recovery_address(&self, caller: Address, address: Address) -> Result<()> {
        let now = self.clock.now();
        self.abuse.check(&caller, now)?;
        self.abuse.ensure_not_blacklisted(&address)?;

        let lock = self.owner_lock(&caller);
        let _state = lock.lock().await;

        let result = self.directory.add_recovery_address(&caller, address);
        self.record_outcome(&caller, now, &result);
        result?;

        self.audit(caller, AuditEvent::RecoveryAddressAdded { owner: caller, address })
            .await;
        Ok(())
    }

    /// Remove one of the caller's recovery addresses
    #[instrument(skip(self))]
    pub async fn remove_recovery_address(&self, caller: Address, address: Address) -> Result<()> {
        let now = self.clock.now();
        self.abuse.check(&caller, now)?;

        let lock = self.owner_lock(&caller);
        let _state = lock.lock().await;

        let result = self.directory.remove_recovery_address(&caller, &address);
        self.record_outcome(&caller, now, &result);
        result?;

        self.audit(caller, AuditEvent::RecoveryAddressRemoved { owner: caller, address })
            .await;
        Ok(())
    }

    /// Designate the caller's emergency contact
    #[instrument(skip(self))]
    pub async fn set_emergency_contact(&self, caller: Address, contact: Address) -> Result<()> {
        let now = self.clock.now();
        self.abuse.check(&caller, now)?;
        self.abuse.ensure_not_blacklisted(&contact)?;

        let lock = self.owner_lock(&caller);
        let _state = lock.lock().await;

        let result = self.directory.set_emergency_contact(&caller, contact);
        self.record_outcome(&caller, now, &result);
        result?;

        self.audit(caller, AuditEvent::EmergencyContactSet { owner: caller, contact })
            .await;
        Ok(())
    }

    /// Remove the caller's emergency contact
    #[instrument(skip(self))]
    pub async fn clear_emergency_contact(&self, caller: Address) -> Result<()> {
        let now = self.clock.now();
        self.abuse.check(&caller, now)?;

        let lock = self.owner_lock(&caller);
        let _state = lock.lock().await;

        let result = self.directory.clear_emergency_contact(&caller);
        self.record_outcome(&caller, now, &result);
        result?;

        self.audit(caller, AuditEvent::EmergencyContactCleared { owner: caller })
            .await;
        Ok(())
    }

    /// Recovery addresses of `owner`
    pub fn recovery_addresses(&self, owner: &Address) -> Vec<Address> {
        self.directory.recovery_addresses(owner)
    }

    /// Emergency contact of `owner`
    pub fn emergency_contact(&self, owner: &Address) -> Option<Address> {
        self.directory.emergency_contact(owner)
    }

    // ========================================================================
    // Recovery requests
    // ========================================================================

    /// Open a time-locked recovery request for `owner`
    #[instrument(skip(self))]
    pub async fn initiate_recovery(&self, owner: Address, caller: Address) -> Result<RecoveryRequest> {
        let now = self.clock.now();
        self.abuse.check(&caller, now)?;

        let lock = self.existing_owner(&owner)?;
        let state = lock.lock().await;

        let result = match state.active_config() {
            Some(_) => self.directory.initiate_recovery(&owner, caller, now),
            None => Err(Error::Lifecycle(format!(
                "{} has no active configuration to recover",
                owner
            ))),
        };
        self.record_outcome(&caller, now, &result);
        let request = result?;

        self.audit(
            caller,
            AuditEvent::RecoveryInitiated {
                owner,
                initiator: caller,
                expires_at: request.expires_at,
                request_hash: request.request_hash,
            },
        )
        .await;
        Ok(request)
    }

    /// Cancel `owner`'s active request (owner or initiator)
    #[instrument(skip(self))]
    pub async fn cancel_recovery(&self, owner: Address, caller: Address) -> Result<RecoveryRequest> {
        let now = self.clock.now();
        self.abuse.ensure_not_blacklisted(&caller)?;
        self.abuse.ensure_not_locked(&caller, now)?;

        let lock = self.owner_with_request(&owner)?;
        let _state = lock.lock().await;

        let result = self.directory.cancel_recovery(&owner, &caller, false);
        if let Err(e) = &result {
            if e.counts_as_failure() {
                self.abuse.record_failure(&caller, now);
            }
        }
        let request = result?;

        self.audit(
            caller,
            AuditEvent::RecoveryCancelled {
                owner,
                cancelled_by: caller,
                administrative: false,
            },
        )
        .await;
        Ok(request)
    }

    /// Active recovery request of `owner`
    pub fn active_recovery(&self, owner: &Address) -> Option<RecoveryRequest> {
        self.directory.active_recovery(owner)
    }

    /// Whether `initiator`'s request for `owner` has passed its time lock
    pub fn recovery_unlocked(&self, owner: &Address, initiator: &Address) -> bool {
        self.directory
            .recovery_unlocked(owner, initiator, self.clock.now())
    }

    /// How `accessor` relates to `owner`'s shares right now
    pub fn authorization_for(&self, owner: &Address, accessor: &Address) -> Authorization {
        self.directory.authorize(owner, accessor, self.clock.now())
    }

    /// Whether `accessor` may read `owner`'s shares right now
    pub fn is_authorized_for_share(&self, owner: &Address, accessor: &Address) -> bool {
        self.authorization_for(owner, accessor).is_granted()
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Blacklist an address
    pub async fn blacklist_add(&self, admin: Address, address: Address) -> Result<bool> {
        self.require_admin(&admin)?;
        let added = self.abuse.blacklist_add(address);
        if added {
            warn!(address = %address, "Address blacklisted");
            self.audit(admin, AuditEvent::AddressBlacklisted { address }).await;
        }
        Ok(added)
    }

    /// Lift a blacklist entry
    pub async fn blacklist_remove(&self, admin: Address, address: Address) -> Result<bool> {
        self.require_admin(&admin)?;
        let removed = self.abuse.blacklist_remove(&address);
        if removed {
            self.audit(admin, AuditEvent::AddressUnblacklisted { address }).await;
        }
        Ok(removed)
    }

    /// Whether `address` is blacklisted
    pub fn is_blacklisted(&self, address: &Address) -> bool {
        self.abuse.is_blacklisted(address)
    }

    /// Grant or revoke a fee exemption
    pub async fn set_fee_exempt(&self, admin: Address, address: Address, exempt: bool) -> Result<()> {
        self.require_admin(&admin)?;
        self.abuse.set_fee_exempt(address, exempt);
        self.audit(admin, AuditEvent::FeeExemptionChanged { address, exempt })
            .await;
        Ok(())
    }

    /// Change the store fee
    pub async fn set_required_fee(&self, admin: Address, fee: u128) -> Result<()> {
        self.require_admin(&admin)?;
        self.abuse.set_required_fee(fee);
        self.audit(admin, AuditEvent::RequiredFeeChanged { fee }).await;
        Ok(())
    }

    /// Fee `address` must attach to a store
    pub fn fee_due(&self, address: &Address) -> u128 {
        self.abuse.fee_due(address)
    }

    /// Cancel any owner's active recovery request
    pub async fn admin_cancel_recovery(&self, admin: Address, owner: Address) -> Result<RecoveryRequest> {
        self.require_admin(&admin)?;
        let lock = self.owner_with_request(&owner)?;
        let _state = lock.lock().await;

        let request = self.directory.cancel_recovery(&owner, &admin, true)?;
        self.audit(
            admin,
            AuditEvent::RecoveryCancelled {
                owner,
                cancelled_by: admin,
                administrative: true,
            },
        )
        .await;
        Ok(request)
    }

    /// Clear lockouts and access throttles of `address`
    pub async fn reset_throttle(&self, admin: Address, address: Address) -> Result<()> {
        self.require_admin(&admin)?;
        self.abuse.reset(&address);
        self.registry_access.retain(|(_, caller), _| *caller != address);
        self.audit(admin, AuditEvent::ThrottleReset { address }).await;
        Ok(())
    }

    /// End of `address`'s current lockout
    pub fn locked_until(&self, address: &Address) -> Option<DateTime<Utc>> {
        self.abuse.locked_until(address, self.clock.now())
    }

    /// Audit log, optionally filtered to one owner
    pub async fn audit_log(&self, owner: Option<&Address>) -> Result<Vec<AuditRecord>> {
        self.store.audit_log(owner).await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_admin(&self, caller: &Address) -> Result<()> {
        match self.config.admin {
            Some(admin) if admin == *caller => Ok(()),
            _ => Err(Error::Unauthorized(format!("{} is not the administrator", caller))),
        }
    }

    fn owner_lock(&self, owner: &Address) -> Arc<Mutex<OwnerState>> {
        self.owners.entry(*owner).or_default().value().clone()
    }

    fn existing_owner(&self, owner: &Address) -> Result<Arc<Mutex<OwnerState>>> {
        self.owners
            .get(owner)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::Lifecycle(format!("{} has no configuration", owner)))
    }

    /// Lock of an owner that may hold a recovery request, without creating one
    fn owner_with_request(&self, owner: &Address) -> Result<Arc<Mutex<OwnerState>>> {
        self.owners
            .get(owner)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::NotFound(format!("no active recovery request for {}", owner)))
    }

    fn record_outcome<T>(&self, address: &Address, now: DateTime<Utc>, result: &Result<T>) {
        match result {
            Ok(_) => self.abuse.record_success(address, now),
            Err(e) if e.counts_as_failure() => {
                self.abuse.record_failure(address, now);
            }
            Err(_) => {}
        }
    }

    async fn persist_config(&self, record: &ShamirConfig) -> Result<()> {
        let write = with_retry(&self.config.retry, "put_config", || {
            self.store.put_config(record)
        });

        confirm(self.config.confirmation_timeout(), "put_config", write, || async {
            let stored = self.store.get_config(&record.owner).await?;
            Ok(stored.filter(|s| s == record).map(|_| ()))
        })
        .await
    }

    async fn refund_fee(&self, collector: &Address, payer: &Address, amount: u128) {
        let result = with_retry(&self.config.retry, "refund_fee", || {
            self.fees.refund(collector, payer, amount)
        })
        .await;

        match result {
            Ok(()) => info!(payer = %payer, amount, "Fee refunded after failed store"),
            Err(e) => error!(payer = %payer, amount, error = %e, "Failed to refund fee"),
        }
    }

    /// Append to the audit log after a transition has been committed
    ///
    /// The transition stands either way; a lost record is logged.
    async fn audit(&self, actor: Address, event: AuditEvent) {
        let at = self.clock.now();
        let result = with_retry(&self.config.retry, "append_audit", || {
            self.store.append_audit(at, actor, event.clone())
        })
        .await;

        if let Err(e) = result {
            error!(actor = %actor, event = ?event, error = %e, "Failed to record audit event");
        }
    }
}
