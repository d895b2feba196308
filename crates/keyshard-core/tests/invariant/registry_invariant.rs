//! Invariant tests for the share registry
//!
//! These tests verify guarantees that must hold under concurrency:
//! - At most one active configuration per owner
//! - At most one active recovery request per owner
//! - No designated party reads a share before the time lock elapses
//! - Configuration hashes always verify

use chrono::Duration;
use keyshard_core::{
    Address, Authorization, EncryptedShare, ErrorKind, ManualClock, RegistryConfig, ShareRegistry,
};
use std::sync::Arc;

fn addr(b: u8) -> Address {
    Address::from_bytes([b; 20])
}

fn blobs(n: usize) -> Vec<EncryptedShare> {
    (0..n)
        .map(|i| EncryptedShare {
            iv: [i as u8; 16],
            ephemeral_public_key: [4; 65],
            ciphertext: vec![0xab; 66],
            auth_tag: [i as u8; 16],
        })
        .collect()
}

/// Helper: shared registry with a manual clock
fn setup() -> (Arc<ShareRegistry>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let registry = ShareRegistry::new(RegistryConfig::default().with_min_action_interval_secs(0))
        .unwrap()
        .with_clock(clock.clone());
    (Arc::new(registry), clock)
}

// ============================================================================
// Lifecycle Invariants
// ============================================================================

/// INVARIANT: concurrent stores for one owner create exactly one configuration
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invariant_single_active_config_under_contention() {
    for _ in 0..5 {
        let (registry, _) = setup();
        let owner = addr(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&registry);
                tokio::spawn(async move { r.store(owner, blobs(3), 2, 0).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(
                    matches!(e.kind(), ErrorKind::Lifecycle | ErrorKind::RateLimited),
                    "unexpected error {:?}",
                    e
                ),
            }
        }
        assert_eq!(successes, 1, "exactly one store must win");

        let config = registry.shamir_config(&owner).await.unwrap();
        assert_eq!(config.generation, 1);
        assert!(config.verify_hash());
    }
}

/// INVARIANT: store and revoke racing never leave custodians and record disagreeing
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invariant_revoke_is_atomic() {
    let (registry, _) = setup();
    let owner = addr(2);
    registry.store(owner, blobs(4), 3, 0).await.unwrap();

    let revokers: Vec<_> = (0..4)
        .map(|_| {
            let r = Arc::clone(&registry);
            tokio::spawn(async move { r.revoke_shares(owner).await })
        })
        .collect();

    let mut revoked = 0;
    for handle in revokers {
        if handle.await.unwrap().is_ok() {
            revoked += 1;
        }
    }
    assert_eq!(revoked, 1);

    assert!(!registry.shamir_config(&owner).await.unwrap().active);
    for index in 0..4 {
        let err = registry.get_share(owner, index, owner).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inactive);
    }
}

// ============================================================================
// Recovery Invariants
// ============================================================================

/// INVARIANT: concurrent initiations by different designees open one request
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invariant_single_active_request() {
    let (registry, _) = setup();
    let owner = addr(3);
    registry.store(owner, blobs(3), 2, 0).await.unwrap();
    for b in 10..15 {
        registry.add_recovery_address(owner, addr(b)).await.unwrap();
    }

    let initiators: Vec<_> = (10..15)
        .map(|b| {
            let r = Arc::clone(&registry);
            tokio::spawn(async move { r.initiate_recovery(owner, addr(b)).await })
        })
        .collect();

    let mut opened = 0;
    for handle in initiators {
        match handle.await.unwrap() {
            Ok(_) => opened += 1,
            Err(e) => assert_eq!(e.kind(), ErrorKind::RecoveryConflict),
        }
    }
    assert_eq!(opened, 1);
    assert!(registry.active_recovery(&owner).is_some());
}

/// INVARIANT: no designee is authorized at any instant before the lock elapses
#[tokio::test]
async fn invariant_no_access_before_time_lock() {
    let (registry, clock) = setup();
    let owner = addr(4);
    let helper = addr(20);
    let contact = addr(21);
    registry.store(owner, blobs(3), 2, 0).await.unwrap();
    registry.add_recovery_address(owner, helper).await.unwrap();
    registry.set_emergency_contact(owner, contact).await.unwrap();
    registry.initiate_recovery(owner, contact).await.unwrap();

    for _ in 0..47 {
        clock.advance(Duration::hours(1));
        for who in [helper, contact, addr(99)] {
            assert_eq!(registry.authorization_for(&owner, &who), Authorization::Denied);
        }
    }

    clock.advance(Duration::hours(1));
    assert_eq!(
        registry.authorization_for(&owner, &contact),
        Authorization::ExpiredRecoveryInitiator
    );
    assert_eq!(
        registry.authorization_for(&owner, &helper),
        Authorization::RecoveryAddress
    );
    assert_eq!(registry.authorization_for(&owner, &owner), Authorization::Owner);
}

/// INVARIANT: non-owner reads are throttled to one per interval
#[tokio::test]
async fn invariant_non_owner_reads_are_throttled() {
    let (registry, clock) = setup();
    let owner = addr(5);
    let helper = addr(30);
    registry.store(owner, blobs(3), 2, 0).await.unwrap();
    registry.add_recovery_address(owner, helper).await.unwrap();
    registry.initiate_recovery(owner, helper).await.unwrap();
    clock.advance(Duration::hours(48));

    registry.get_share(owner, 0, helper).await.unwrap();
    let err = registry.get_share(owner, 1, helper).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);

    clock.advance(Duration::minutes(5));
    registry.get_share(owner, 1, helper).await.unwrap();

    // Owner is never throttled
    for _ in 0..5 {
        registry.get_share(owner, 2, owner).await.unwrap();
    }
}
