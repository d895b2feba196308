//! Abuse controls for the share registry
//!
//! Checks applied before any state-changing registry call:
//!
//! - **Blacklist**: hard deny, set by the administrator
//! - **Fee exemption**: allowlisted addresses pay no store fee
//! - **Minimum inter-action delay**: an address may act at most once per interval
//! - **Escalating lockout**: after a bounded number of consecutive failures
//!   inside a rolling window the address is locked out, each further lockout
//!   twice as long as the last; a quiet cool-down period forgets the history

use crate::config::RegistryConfig;
use crate::types::Address;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Tunables taken from [`RegistryConfig`]
#[derive(Debug, Clone)]
pub struct AbusePolicy {
    /// Minimum gap between two actions by one address
    pub min_action_interval: Duration,
    /// Window in which consecutive failures are counted
    pub failure_window: Duration,
    /// Failures inside the window that trigger a lockout
    pub max_consecutive_failures: u32,
    /// First lockout
    pub base_lockout: Duration,
    /// Lockout ceiling
    pub max_lockout: Duration,
    /// Quiet period that clears the history
    pub cooldown: Duration,
}

impl From<&RegistryConfig> for AbusePolicy {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            min_action_interval: Duration::seconds(config.min_action_interval_secs),
            failure_window: Duration::seconds(config.failure_window_secs),
            max_consecutive_failures: config.max_consecutive_failures,
            base_lockout: Duration::seconds(config.base_lockout_secs),
            max_lockout: Duration::seconds(config.max_lockout_secs),
            cooldown: Duration::seconds(config.cooldown_secs),
        }
    }
}

/// Per-address activity
#[derive(Debug, Default, Clone)]
struct ActivityTracker {
    last_action: Option<DateTime<Utc>>,
    window_start: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    lockouts: u32,
    locked_until: Option<DateTime<Utc>>,
}

impl ActivityTracker {
    fn forget_if_cooled_down(&mut self, now: DateTime<Utc>, cooldown: Duration) {
        let locked = self.locked_until.map(|until| now < until).unwrap_or(false);
        if locked {
            return;
        }
        let quiet_since = match (self.last_failure, self.locked_until) {
            (Some(f), Some(l)) => Some(f.max(l)),
            (f, l) => f.or(l),
        };
        if let Some(since) = quiet_since {
            if now - since >= cooldown {
                self.window_start = None;
                self.consecutive_failures = 0;
                self.last_failure = None;
                self.lockouts = 0;
                self.locked_until = None;
            }
        }
    }
}

/// Blacklist, fee policy and throttling state
#[derive(Debug)]
pub struct AbuseGuard {
    policy: AbusePolicy,
    blacklist: RwLock<HashSet<Address>>,
    fee_exempt: RwLock<HashSet<Address>>,
    required_fee: RwLock<u128>,
    trackers: RwLock<HashMap<Address, ActivityTracker>>,
}

impl AbuseGuard {
    /// Create a guard
    pub fn new(policy: AbusePolicy, required_fee: u128) -> Self {
        Self {
            policy,
            blacklist: RwLock::new(HashSet::new()),
            fee_exempt: RwLock::new(HashSet::new()),
            required_fee: RwLock::new(required_fee),
            trackers: RwLock::new(HashMap::new()),
        }
    }

    /// Build from registry config
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(AbusePolicy::from(config), config.required_fee)
    }

    // ========================================================================
    // Blacklist
    // ========================================================================

    /// Whether `address` is blacklisted
    pub fn is_blacklisted(&self, address: &Address) -> bool {
        self.blacklist.read().contains(address)
    }

    /// Fail if `address` is blacklisted
    pub fn ensure_not_blacklisted(&self, address: &Address) -> Result<()> {
        if self.is_blacklisted(address) {
            Err(Error::Blacklisted(address.to_string()))
        } else {
            Ok(())
        }
    }

    /// Blacklist an address; false if it already was
    pub fn blacklist_add(&self, address: Address) -> bool {
        self.blacklist.write().insert(address)
    }

    /// Lift a blacklist entry; false if there was none
    pub fn blacklist_remove(&self, address: &Address) -> bool {
        self.blacklist.write().remove(address)
    }

    // ========================================================================
    // Fees
    // ========================================================================

    /// Current store fee
    pub fn required_fee(&self) -> u128 {
        *self.required_fee.read()
    }

    /// Change the store fee
    pub fn set_required_fee(&self, fee: u128) {
        *self.required_fee.write() = fee;
    }

    /// Add or remove a fee exemption
    pub fn set_fee_exempt(&self, address: Address, exempt: bool) {
        let mut set = self.fee_exempt.write();
        if exempt {
            set.insert(address);
        } else {
            set.remove(&address);
        }
    }

    /// Whether `address` pays no fee
    pub fn is_fee_exempt(&self, address: &Address) -> bool {
        self.fee_exempt.read().contains(address)
    }

    /// Fee `address` must attach
    pub fn fee_due(&self, address: &Address) -> u128 {
        if self.is_fee_exempt(address) {
            0
        } else {
            self.required_fee()
        }
    }

    // ========================================================================
    // Throttling
    // ========================================================================

    /// Fail if `address` is locked out
    pub fn ensure_not_locked(&self, address: &Address, now: DateTime<Utc>) -> Result<()> {
        let mut trackers = self.trackers.write();
        if let Some(tracker) = trackers.get_mut(address) {
            tracker.forget_if_cooled_down(now, self.policy.cooldown);
            if let Some(until) = tracker.locked_until.filter(|until| now < *until) {
                return Err(Error::Throttled { until });
            }
        }
        Ok(())
    }

    /// Fail if `address` is blacklisted, locked out, or acting too soon
    pub fn check(&self, address: &Address, now: DateTime<Utc>) -> Result<()> {
        self.ensure_not_blacklisted(address)?;
        self.ensure_not_locked(address, now)?;

        if let Some(last) = self
            .trackers
            .read()
            .get(address)
            .and_then(|t| t.last_action)
        {
            let next_allowed = last + self.policy.min_action_interval;
            if now < next_allowed {
                return Err(Error::RateLimited {
                    retry_after_secs: (next_allowed - now).num_seconds().max(1),
                });
            }
        }
        Ok(())
    }

    /// Record a successful action
    pub fn record_success(&self, address: &Address, now: DateTime<Utc>) {
        let mut trackers = self.trackers.write();
        let tracker = trackers.entry(*address).or_default();
        tracker.last_action = Some(now);
        tracker.consecutive_failures = 0;
        tracker.window_start = None;
    }

    /// Record a failed action; returns the lockout end if this failure triggered one
    pub fn record_failure(&self, address: &Address, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut trackers = self.trackers.write();
        let tracker = trackers.entry(*address).or_default();
        tracker.forget_if_cooled_down(now, self.policy.cooldown);

        let window_expired = tracker
            .window_start
            .map(|start| now - start > self.policy.failure_window)
            .unwrap_or(true);
        if window_expired {
            tracker.window_start = Some(now);
            tracker.consecutive_failures = 0;
        }

        tracker.consecutive_failures += 1;
        tracker.last_failure = Some(now);

        if tracker.consecutive_failures < self.policy.max_consecutive_failures {
            return None;
        }

        tracker.lockouts += 1;
        let lockout = self.lockout_for(tracker.lockouts);
        let until = now + lockout;
        tracker.locked_until = Some(until);
        tracker.consecutive_failures = 0;
        tracker.window_start = None;

        warn!(
            address = %address,
            lockouts = tracker.lockouts,
            until = %until,
            "Address locked out after repeated failures"
        );
        Some(until)
    }

    /// End of the current lockout, if any
    pub fn locked_until(&self, address: &Address, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.trackers
            .read()
            .get(address)
            .and_then(|t| t.locked_until)
            .filter(|until| now < *until)
    }

    /// Drop all throttling state for `address`
    pub fn reset(&self, address: &Address) -> bool {
        self.trackers.write().remove(address).is_some()
    }

    fn lockout_for(&self, lockouts: u32) -> Duration {
        let factor = 1i32
            .checked_shl(lockouts.saturating_sub(1))
            .filter(|f| *f > 0)
            .unwrap_or(i32::MAX);
        self.policy
            .base_lockout
            .checked_mul(factor)
            .unwrap_or(self.policy.max_lockout)
            .min(self.policy.max_lockout)
    }
}
