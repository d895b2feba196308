//! Integration tests for backup and time-locked recovery
//!
//! These tests drive the registry end to end:
//! - Split, seal, store and read back as the owner
//! - Recovery by a designated party after the time lock
//! - Revoke and re-store
//! - Transient store failures

use chrono::Duration;
use k256::SecretKey;
use keyshard_core::{
    encrypt_share, recover_secret, shamir::verify_against_public_key, split, Address, AuditEvent,
    EncryptedShare, Error, ErrorKind, ManualClock, MemoryRegistryStore, RegistryConfig,
    RegistryStore, RetryConfig, Secret, ShareRegistry, StaticKeyProvider, TransientKind,
};
use rand::rngs::OsRng;
use std::sync::Arc;

struct Setup {
    registry: ShareRegistry,
    clock: Arc<ManualClock>,
    owner_key: SecretKey,
    owner: Address,
    secret: Secret,
}

/// Helper: registry with a manual clock and a freshly generated owner key
fn setup() -> Setup {
    let clock = Arc::new(ManualClock::starting_now());
    let config = RegistryConfig::default().with_admin(Address::from_bytes([0xad; 20]));
    let registry = ShareRegistry::new(config).unwrap().with_clock(clock.clone());

    let owner_key = SecretKey::random(&mut OsRng);
    let owner = Address::from_public_key(&owner_key.public_key());
    let secret = Secret::new(owner_key.to_bytes().to_vec());

    Setup {
        registry,
        clock,
        owner_key,
        owner,
        secret,
    }
}

fn seal(setup: &Setup, n: usize, t: usize) -> Vec<EncryptedShare> {
    split(&setup.secret, n, t)
        .unwrap()
        .iter()
        .map(|s| encrypt_share(&setup.owner_key.public_key(), s).unwrap())
        .collect()
}

fn pause(clock: &ManualClock) {
    clock.advance(Duration::seconds(11));
}

#[tokio::test]
async fn test_owner_backup_and_recover() {
    let s = setup();
    let handles = s.registry.store(s.owner, seal(&s, 5, 3), 3, 0).await.unwrap();
    assert_eq!(handles.len(), 5);

    let config = s.registry.shamir_config(&s.owner).await.unwrap();
    assert_eq!(config.total_shares, 5);
    assert_eq!(config.threshold, 3);
    assert!(config.verify_hash());
    assert!(s.registry.verify_config_hash(&s.owner).await.unwrap());

    let provider = StaticKeyProvider::with_key(s.owner, s.owner_key.clone());
    let recovered = recover_secret(&s.registry, s.owner, s.owner, &provider, 32)
        .await
        .unwrap();
    assert_eq!(recovered, s.secret);
    assert!(verify_against_public_key(&recovered, &s.owner_key.public_key()).unwrap());
}

#[tokio::test]
async fn test_recovery_waits_for_time_lock() {
    let s = setup();
    let helper = Address::from_bytes([0x22; 20]);
    s.registry.store(s.owner, seal(&s, 5, 3), 3, 0).await.unwrap();
    pause(&s.clock);
    s.registry.add_recovery_address(s.owner, helper).await.unwrap();

    let request = s.registry.initiate_recovery(s.owner, helper).await.unwrap();
    assert!(!request.is_unlocked(s.clock_now()));

    // Immediately after initiating: still locked
    let err = s.registry.get_share(s.owner, 0, helper).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    // One second short of the lock
    s.clock.advance(Duration::hours(48) - Duration::seconds(1));
    let err = s.registry.get_share(s.owner, 0, helper).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    s.clock.advance(Duration::seconds(1));
    let provider = StaticKeyProvider::with_key(s.owner, s.owner_key.clone());
    let recovered = recover_secret(&s.registry, s.owner, helper, &provider, 32)
        .await
        .unwrap();
    assert_eq!(recovered, s.secret);
}

#[tokio::test]
async fn test_owner_cancel_blocks_recovery() {
    let s = setup();
    let contact = Address::from_bytes([0x33; 20]);
    s.registry.store(s.owner, seal(&s, 3, 2), 2, 0).await.unwrap();
    pause(&s.clock);
    s.registry.set_emergency_contact(s.owner, contact).await.unwrap();

    s.registry.initiate_recovery(s.owner, contact).await.unwrap();
    s.clock.advance(Duration::hours(1));
    s.registry.cancel_recovery(s.owner, s.owner).await.unwrap();

    s.clock.advance(Duration::hours(48));
    assert!(!s.registry.is_authorized_for_share(&s.owner, &contact));
    let err = s.registry.get_share(s.owner, 0, contact).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
}

#[tokio::test]
async fn test_stranger_is_unauthorized() {
    let s = setup();
    s.registry.store(s.owner, seal(&s, 3, 2), 2, 0).await.unwrap();

    let stranger = Address::from_bytes([0x99; 20]);
    for index in 0..3 {
        let err = s.registry.get_share(s.owner, index, stranger).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
    assert!(s.registry.get_share(s.owner, 1, s.owner).await.is_ok());
}

#[tokio::test]
async fn test_revoke_then_store_fresh_configuration() {
    let s = setup();
    let helper = Address::from_bytes([0x22; 20]);
    s.registry.store(s.owner, seal(&s, 4, 3), 3, 0).await.unwrap();
    pause(&s.clock);
    s.registry.add_recovery_address(s.owner, helper).await.unwrap();
    s.registry.initiate_recovery(s.owner, helper).await.unwrap();

    s.registry.revoke_shares(s.owner).await.unwrap();
    assert!(s.registry.active_recovery(&s.owner).is_none());

    s.clock.advance(Duration::hours(48));
    for index in 0..4 {
        let err = s.registry.get_share(s.owner, index, s.owner).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inactive);
        let err = s.registry.get_share(s.owner, index, helper).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inactive);
    }

    let handles = s.registry.store(s.owner, seal(&s, 3, 2), 2, 0).await.unwrap();
    assert_eq!(handles.len(), 3);
    let config = s.registry.shamir_config(&s.owner).await.unwrap();
    assert!(config.active);
    assert_eq!(config.generation, 2);

    let log = s.registry.audit_log(Some(&s.owner)).await.unwrap();
    let revoked = log
        .iter()
        .filter(|r| matches!(r.event, AuditEvent::SharesRevoked { .. }))
        .count();
    assert_eq!(revoked, 1);
    assert!(log
        .iter()
        .any(|r| matches!(r.event, AuditEvent::RecoveryCancelled { administrative: false, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_then_surfaced() {
    let s = setup();
    let store = Arc::new(MemoryRegistryStore::new());
    let registry = ShareRegistry::new(
        RegistryConfig::default().with_retry_config(RetryConfig::default().with_max_attempts(4)),
    )
    .unwrap()
    .with_clock(s.clock.clone())
    .with_store(store.clone());

    store.fail_next_writes(3, TransientKind::OrderingConflict);
    registry.store(s.owner, seal(&s, 3, 2), 2, 0).await.unwrap();
    assert!(store.get_config(&s.owner).await.unwrap().is_some());

    let other = Address::from_bytes([0x44; 20]);
    store.fail_next_writes(100, TransientKind::Network);
    let err = registry.store(other, seal(&s, 3, 2), 2, 0).await.unwrap_err();
    assert!(matches!(err, Error::Transient { kind: TransientKind::Network, .. }));
    assert!(registry.shamir_config(&other).await.is_none());
}

#[tokio::test]
async fn test_aggregate_error_lists_failures() {
    let s = setup();
    let mut blobs = seal(&s, 4, 3);
    blobs[1].iv[0] ^= 0xff;
    blobs[3].ephemeral_public_key[10] ^= 0x01;
    s.registry.store(s.owner, blobs, 3, 0).await.unwrap();

    let provider = StaticKeyProvider::with_key(s.owner, s.owner_key.clone());
    let err = recover_secret(&s.registry, s.owner, s.owner, &provider, 32)
        .await
        .unwrap_err();
    match err {
        Error::AggregateRetrieval { succeeded, failures, .. } => {
            assert_eq!(succeeded, 2);
            let indices: Vec<usize> = failures.iter().map(|f| f.index).collect();
            assert_eq!(indices, vec![1, 3]);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

impl Setup {
    fn clock_now(&self) -> chrono::DateTime<chrono::Utc> {
        use keyshard_core::Clock;
        self.clock.now()
    }
}
