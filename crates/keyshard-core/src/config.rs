//! Registry configuration
//!
//! All tunables of the share registry live in [`RegistryConfig`]. Durations
//! are stored as whole seconds (milliseconds for the retry policy) so the
//! config round-trips through JSON unchanged.
//!
//! ```rust,ignore
//! use keyshard_core::config::{RegistryConfig, RetryConfig};
//!
//! let config = RegistryConfig::default()
//!     .with_required_fee(1_000)
//!     .with_fee_collector(treasury)
//!     .with_admin(admin)
//!     .with_recovery_time_lock_secs(48 * 3600);
//! config.validate()?;
//! ```

use crate::shamir::MAX_SHARES;
use crate::types::{keccak256, Address};
use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default recovery time lock (48 hours)
pub const DEFAULT_RECOVERY_TIME_LOCK_SECS: i64 = 48 * 60 * 60;

/// Default per-caller access interval (5 minutes)
pub const DEFAULT_ACCESS_INTERVAL_SECS: i64 = 5 * 60;

/// Retry policy for calls into the external store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A policy that tries exactly once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set maximum attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the initial and maximum delay
    pub fn with_delays(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_delay_ms = initial_ms;
        self.max_delay_ms = max_ms;
        self
    }

    /// Delay before retry number `retry` (1-based), capped at `max_delay_ms`
    pub fn delay_for(&self, retry: u32) -> std::time::Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        std::time::Duration::from_millis(capped as u64)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("retry max_attempts must be at least 1".into()));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(Error::Config(format!(
                "retry backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(Error::Config(format!(
                "retry initial_delay_ms {} exceeds max_delay_ms {}",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Share registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Address the registry acts under (custodian back-reference, signing domain)
    pub registry_address: Address,
    /// Administrator allowed to run blacklist, fee and override operations
    pub admin: Option<Address>,

    /// Fewest shares a configuration may hold
    pub min_shares: usize,
    /// Most shares a configuration may hold
    pub max_shares: usize,
    /// Maximum recovery addresses per owner
    pub max_recovery_addresses: usize,

    /// Delay between initiating recovery and recovery access
    pub recovery_time_lock_secs: i64,
    /// Minimum gap between two custodian reads by the same non-owner
    pub custodian_access_interval_secs: i64,
    /// Minimum gap between two registry reads by the same non-owner
    pub registry_access_interval_secs: i64,

    /// Minimum gap between two mutating actions by the same address
    pub min_action_interval_secs: i64,
    /// Window in which consecutive failures are counted
    pub failure_window_secs: i64,
    /// Consecutive failures inside the window before a lockout
    pub max_consecutive_failures: u32,
    /// First lockout duration; doubles with every further lockout
    pub base_lockout_secs: i64,
    /// Longest lockout ever applied
    pub max_lockout_secs: i64,
    /// Quiet period after which the failure history is forgotten
    pub cooldown_secs: i64,

    /// Fee charged per store, in the payment mechanism's smallest unit
    pub required_fee: u128,
    /// Recipient of collected fees
    pub fee_collector: Address,

    /// Retry policy for store writes
    pub retry: RetryConfig,
    /// Bound on waiting for durable confirmation
    pub confirmation_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            registry_address: Address::from_digest(&keccak256(b"keyshard/registry")),
            admin: None,
            min_shares: 3,
            max_shares: MAX_SHARES,
            max_recovery_addresses: 10,
            recovery_time_lock_secs: DEFAULT_RECOVERY_TIME_LOCK_SECS,
            custodian_access_interval_secs: DEFAULT_ACCESS_INTERVAL_SECS,
            registry_access_interval_secs: DEFAULT_ACCESS_INTERVAL_SECS,
            min_action_interval_secs: 10,
            failure_window_secs: 60 * 60,
            max_consecutive_failures: 5,
            base_lockout_secs: 15 * 60,
            max_lockout_secs: 24 * 60 * 60,
            cooldown_secs: 24 * 60 * 60,
            required_fee: 0,
            fee_collector: Address::ZERO,
            retry: RetryConfig::default(),
            confirmation_timeout_ms: 30_000,
        }
    }
}

impl RegistryConfig {
    /// Create a config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON config file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the registry address
    pub fn with_registry_address(mut self, address: Address) -> Self {
        self.registry_address = address;
        self
    }

    /// Set the administrator
    pub fn with_admin(mut self, admin: Address) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Set the store fee
    pub fn with_required_fee(mut self, fee: u128) -> Self {
        self.required_fee = fee;
        self
    }

    /// Set the fee recipient
    pub fn with_fee_collector(mut self, collector: Address) -> Self {
        self.fee_collector = collector;
        self
    }

    /// Set the recovery time lock
    pub fn with_recovery_time_lock_secs(mut self, secs: i64) -> Self {
        self.recovery_time_lock_secs = secs;
        self
    }

    /// Set both per-caller access intervals
    pub fn with_access_interval_secs(mut self, secs: i64) -> Self {
        self.custodian_access_interval_secs = secs;
        self.registry_access_interval_secs = secs;
        self
    }

    /// Set the minimum delay between mutating actions
    pub fn with_min_action_interval_secs(mut self, secs: i64) -> Self {
        self.min_action_interval_secs = secs;
        self
    }

    /// Set the lockout policy
    pub fn with_lockout(mut self, max_failures: u32, base_lockout_secs: i64) -> Self {
        self.max_consecutive_failures = max_failures;
        self.base_lockout_secs = base_lockout_secs;
        self
    }

    /// Set the retry policy
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the confirmation timeout
    pub fn with_confirmation_timeout_ms(mut self, ms: u64) -> Self {
        self.confirmation_timeout_ms = ms;
        self
    }

    /// Recovery time lock as a duration
    pub fn recovery_time_lock(&self) -> Duration {
        Duration::seconds(self.recovery_time_lock_secs)
    }

    /// Custodian access interval as a duration
    pub fn custodian_access_interval(&self) -> Duration {
        Duration::seconds(self.custodian_access_interval_secs)
    }

    /// Registry access interval as a duration
    pub fn registry_access_interval(&self) -> Duration {
        Duration::seconds(self.registry_access_interval_secs)
    }

    /// Confirmation timeout as a std duration
    pub fn confirmation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.confirmation_timeout_ms)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> Result<()> {
        if self.min_shares < crate::shamir::MIN_THRESHOLD {
            return Err(Error::Config(format!(
                "min_shares must be at least {}, got {}",
                crate::shamir::MIN_THRESHOLD,
                self.min_shares
            )));
        }
        if self.max_shares > MAX_SHARES || self.min_shares > self.max_shares {
            return Err(Error::Config(format!(
                "share bounds {}..={} must lie within 2..={}",
                self.min_shares, self.max_shares, MAX_SHARES
            )));
        }
        if self.max_recovery_addresses == 0 {
            return Err(Error::Config("max_recovery_addresses must be positive".into()));
        }
        if self.recovery_time_lock_secs <= 0 {
            return Err(Error::Config("recovery_time_lock_secs must be positive".into()));
        }

        let non_negative = [
            ("custodian_access_interval_secs", self.custodian_access_interval_secs),
            ("registry_access_interval_secs", self.registry_access_interval_secs),
            ("min_action_interval_secs", self.min_action_interval_secs),
            ("failure_window_secs", self.failure_window_secs),
            ("base_lockout_secs", self.base_lockout_secs),
            ("cooldown_secs", self.cooldown_secs),
        ];
        for (name, value) in non_negative {
            if value < 0 {
                return Err(Error::Config(format!("{} must not be negative", name)));
            }
        }

        if self.max_consecutive_failures == 0 {
            return Err(Error::Config("max_consecutive_failures must be positive".into()));
        }
        if self.base_lockout_secs > self.max_lockout_secs {
            return Err(Error::Config(format!(
                "base_lockout_secs {} exceeds max_lockout_secs {}",
                self.base_lockout_secs, self.max_lockout_secs
            )));
        }
        if self.required_fee > 0 && self.fee_collector.is_zero() {
            return Err(Error::Config("a fee requires a fee_collector".into()));
        }
        if self.registry_address.is_zero() {
            return Err(Error::Config("registry_address must not be zero".into()));
        }

        self.retry.validate()
    }
}
