//! Unit tests for authorization outcomes

use chrono::{Duration, Utc};
use keyshard_core::{AccessPolicy, Address, Authorization, RecoveryDirectory};

fn addr(b: u8) -> Address {
    Address::from_bytes([b; 20])
}

const OWNER: u8 = 1;
const HELPER: u8 = 2;
const SECOND_HELPER: u8 = 3;
const CONTACT: u8 = 4;
const STRANGER: u8 = 9;

fn designated() -> RecoveryDirectory {
    let dir = RecoveryDirectory::new(10, Duration::hours(48));
    dir.add_recovery_address(&addr(OWNER), addr(HELPER)).unwrap();
    dir.add_recovery_address(&addr(OWNER), addr(SECOND_HELPER)).unwrap();
    dir.set_emergency_contact(&addr(OWNER), addr(CONTACT)).unwrap();
    dir
}

#[test]
fn test_owner_always_authorized() {
    let dir = RecoveryDirectory::new(10, Duration::hours(48));
    assert_eq!(
        dir.authorize(&addr(OWNER), &addr(OWNER), Utc::now()),
        Authorization::Owner
    );
}

#[test]
fn test_designees_denied_without_unlocked_request() {
    let dir = designated();
    let now = Utc::now();

    for who in [HELPER, SECOND_HELPER, CONTACT, STRANGER] {
        assert_eq!(
            dir.authorize(&addr(OWNER), &addr(who), now),
            Authorization::Denied
        );
    }

    dir.initiate_recovery(&addr(OWNER), addr(HELPER), now).unwrap();
    let almost = now + Duration::hours(48) - Duration::seconds(1);
    assert_eq!(
        dir.authorize(&addr(OWNER), &addr(HELPER), almost),
        Authorization::Denied
    );
}

#[test]
fn test_outcomes_after_time_lock() {
    let dir = designated();
    let now = Utc::now();
    dir.initiate_recovery(&addr(OWNER), addr(HELPER), now).unwrap();
    let later = now + Duration::hours(48);

    assert_eq!(
        dir.authorize(&addr(OWNER), &addr(HELPER), later),
        Authorization::ExpiredRecoveryInitiator
    );
    assert_eq!(
        dir.authorize(&addr(OWNER), &addr(SECOND_HELPER), later),
        Authorization::RecoveryAddress
    );
    assert_eq!(
        dir.authorize(&addr(OWNER), &addr(CONTACT), later),
        Authorization::EmergencyContact
    );
    assert_eq!(
        dir.authorize(&addr(OWNER), &addr(STRANGER), later),
        Authorization::Denied
    );
    assert!(dir.recovery_unlocked(&addr(OWNER), &addr(HELPER), later));
    assert!(!dir.recovery_unlocked(&addr(OWNER), &addr(CONTACT), later));
}

#[test]
fn test_cancel_closes_access() {
    let dir = designated();
    let now = Utc::now();
    dir.initiate_recovery(&addr(OWNER), addr(CONTACT), now).unwrap();

    // Strangers cannot cancel
    assert!(dir.cancel_recovery(&addr(OWNER), &addr(STRANGER), false).is_err());
    dir.cancel_recovery(&addr(OWNER), &addr(OWNER), false).unwrap();

    let later = now + Duration::hours(72);
    assert_eq!(
        dir.authorize(&addr(OWNER), &addr(CONTACT), later),
        Authorization::Denied
    );
    assert!(dir.active_recovery(&addr(OWNER)).is_none());
}

#[test]
fn test_authorization_serializes_snake_case() {
    let json = serde_json::to_string(&Authorization::ExpiredRecoveryInitiator).unwrap();
    assert_eq!(json, "\"expired_recovery_initiator\"");
    assert!(Authorization::RecoveryAddress.is_granted());
    assert!(!Authorization::Denied.is_granted());
}
