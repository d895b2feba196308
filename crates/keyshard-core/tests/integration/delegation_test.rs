//! Integration tests for delegated stores
//!
//! A relayer submits the owner's blobs with the owner's signature.

use chrono::{Duration, Utc};
use k256::SecretKey;
use keyshard_core::{
    encrypt_share, split, Address, AuditEvent, DelegatedStore, EncryptedShare, ErrorKind,
    ManualClock, MemoryFeeCollector, RegistryConfig, Secret, ShareRegistry,
};
use rand::rngs::OsRng;
use std::sync::Arc;

const RELAYER: Address = Address::from_bytes([0x5e; 20]);

fn sealed(key: &SecretKey) -> Vec<EncryptedShare> {
    let secret = Secret::new(key.to_bytes().to_vec());
    split(&secret, 3, 2)
        .unwrap()
        .iter()
        .map(|s| encrypt_share(&key.public_key(), s).unwrap())
        .collect()
}

fn registry() -> (ShareRegistry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let registry = ShareRegistry::new(RegistryConfig::default())
        .unwrap()
        .with_clock(clock.clone());
    (registry, clock)
}

#[tokio::test]
async fn test_relayer_stores_for_owner() {
    let (registry, clock) = registry();
    let key = SecretKey::random(&mut OsRng);
    let blobs = sealed(&key);
    let deadline = Utc::now() + Duration::hours(1);

    let delegation =
        DelegatedStore::sign(&key, &registry.address(), &blobs, 2, 0, deadline).unwrap();
    let owner = delegation.owner;

    registry
        .store_delegated(RELAYER, delegation, blobs.clone(), 2, 0)
        .await
        .unwrap();

    let config = registry.shamir_config(&owner).await.unwrap();
    assert_eq!(config.owner, owner);
    assert_eq!(registry.delegation_nonce(&owner).await, 1);

    // The relayer holds no share rights
    let err = registry.get_share(owner, 0, RELAYER).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert_eq!(registry.get_share(owner, 0, owner).await.unwrap(), blobs[0]);

    let log = registry.audit_log(Some(&owner)).await.unwrap();
    assert!(matches!(
        log[0].event,
        AuditEvent::SharesStored { delegated: true, .. }
    ));
    assert_eq!(log[0].actor, RELAYER);

    // Replaying the same signature after revoke fails on the nonce
    registry.revoke_shares(owner).await.unwrap();
    clock.advance(Duration::minutes(1));
    let replay =
        DelegatedStore::sign(&key, &registry.address(), &blobs, 2, 0, deadline).unwrap();
    let err = registry
        .store_delegated(RELAYER, replay, blobs, 2, 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_expired_deadline_rejected() {
    let (registry, clock) = registry();
    let key = SecretKey::random(&mut OsRng);
    let blobs = sealed(&key);
    let deadline = Utc::now() + Duration::minutes(5);
    let delegation =
        DelegatedStore::sign(&key, &registry.address(), &blobs, 2, 0, deadline).unwrap();

    clock.advance(Duration::minutes(10));
    let err = registry
        .store_delegated(RELAYER, delegation, blobs, 2, 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_forged_signature_rejected() {
    let (registry, _) = registry();
    let owner_key = SecretKey::random(&mut OsRng);
    let forger = SecretKey::random(&mut OsRng);
    let blobs = sealed(&owner_key);
    let deadline = Utc::now() + Duration::hours(1);

    let mut delegation =
        DelegatedStore::sign(&forger, &registry.address(), &blobs, 2, 0, deadline).unwrap();
    delegation.owner = Address::from_public_key(&owner_key.public_key());

    let err = registry
        .store_delegated(RELAYER, delegation, blobs, 2, 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(registry
        .shamir_config(&Address::from_public_key(&owner_key.public_key()))
        .await
        .is_none());
}

#[tokio::test]
async fn test_relayer_pays_fee() {
    let clock = Arc::new(ManualClock::starting_now());
    let fees = Arc::new(MemoryFeeCollector::new());
    let treasury = Address::from_bytes([0x70; 20]);
    let registry = ShareRegistry::new(
        RegistryConfig::default()
            .with_required_fee(500)
            .with_fee_collector(treasury),
    )
    .unwrap()
    .with_clock(clock)
    .with_fee_collector(fees.clone());

    let key = SecretKey::random(&mut OsRng);
    let blobs = sealed(&key);
    let deadline = Utc::now() + Duration::hours(1);
    let delegation =
        DelegatedStore::sign(&key, &registry.address(), &blobs, 2, 0, deadline).unwrap();

    registry
        .store_delegated(RELAYER, delegation, blobs, 2, 500)
        .await
        .unwrap();

    let transfers = fees.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].from, RELAYER);
    assert_eq!(fees.total_received(&treasury), 500);
}

#[tokio::test]
async fn test_owner_exemption_does_not_cover_relayer() {
    let admin = Address::from_bytes([0xad; 20]);
    let registry = ShareRegistry::new(
        RegistryConfig::default()
            .with_admin(admin)
            .with_required_fee(500),
    )
    .unwrap()
    .with_clock(Arc::new(ManualClock::starting_now()));

    let key = SecretKey::random(&mut OsRng);
    let owner = Address::from_public_key(&key.public_key());
    registry.set_fee_exempt(admin, owner, true).await.unwrap();

    let blobs = sealed(&key);
    let deadline = Utc::now() + Duration::hours(1);
    let delegation =
        DelegatedStore::sign(&key, &registry.address(), &blobs, 2, 0, deadline).unwrap();
    let err = registry
        .store_delegated(RELAYER, delegation, blobs.clone(), 2, 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFee);
    assert_eq!(registry.delegation_nonce(&owner).await, 0);

    registry.set_fee_exempt(admin, RELAYER, true).await.unwrap();
    let delegation =
        DelegatedStore::sign(&key, &registry.address(), &blobs, 2, 0, deadline).unwrap();
    registry
        .store_delegated(RELAYER, delegation, blobs, 2, 0)
        .await
        .unwrap();
    assert!(registry.shamir_config(&owner).await.unwrap().active);
}
