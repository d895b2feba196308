//! Unit tests for share sealing

use keyshard_core::{
    crypto::{parse_public_key, public_key_bytes, EPHEMERAL_KEY_LEN, IV_LEN, MIN_BLOB_LEN, TAG_LEN},
    decrypt_share, encrypt_share,
    field::FieldElement,
    EncryptedShare, ErrorKind, Share,
};
use k256::SecretKey;
use rand::rngs::OsRng;

fn test_key() -> SecretKey {
    SecretKey::from_slice(&[0x2a; 32]).unwrap()
}

fn fixed_share() -> Share {
    Share::new(2, FieldElement::from_u64(0xdead_beef_cafe))
}

#[test]
fn test_fixed_share_roundtrip() {
    let key = test_key();
    let blob = encrypt_share(&key.public_key(), &fixed_share()).unwrap();
    let opened = decrypt_share(&key, &blob).unwrap();

    assert_eq!(opened, fixed_share());
    assert_eq!(opened.value.to_bytes(), fixed_share().value.to_bytes());
}

#[test]
fn test_wire_layout() {
    let key = test_key();
    let blob = encrypt_share(&key.public_key(), &fixed_share()).unwrap();
    let bytes = blob.to_bytes();

    assert_eq!(bytes.len(), blob.len());
    assert_eq!(bytes[..IV_LEN], blob.iv);
    assert_eq!(bytes[IV_LEN..IV_LEN + EPHEMERAL_KEY_LEN], blob.ephemeral_public_key);
    assert_eq!(blob.ephemeral_public_key[0], 0x04);
    assert_eq!(bytes[bytes.len() - TAG_LEN..], blob.auth_tag);

    assert_eq!(EncryptedShare::from_bytes(&bytes).unwrap(), blob);
}

#[test]
fn test_short_blob_is_validation_error() {
    let err = EncryptedShare::from_bytes(&[0u8; MIN_BLOB_LEN - 1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn test_every_encryption_is_fresh() {
    let key = test_key();
    let a = encrypt_share(&key.public_key(), &fixed_share()).unwrap();
    let b = encrypt_share(&key.public_key(), &fixed_share()).unwrap();

    assert_ne!(a.iv, b.iv);
    assert_ne!(a.ephemeral_public_key, b.ephemeral_public_key);
    assert_ne!(a.ciphertext, b.ciphertext);
}

#[test]
fn test_wrong_key_is_integrity_error() {
    let blob = encrypt_share(&test_key().public_key(), &fixed_share()).unwrap();
    let other = SecretKey::random(&mut OsRng);

    let err = decrypt_share(&other, &blob).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
}

#[test]
fn test_truncated_ciphertext_is_integrity_error() {
    let key = test_key();
    let mut blob = encrypt_share(&key.public_key(), &fixed_share()).unwrap();
    blob.ciphertext.pop();

    let err = decrypt_share(&key, &blob).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
}

#[test]
fn test_public_key_parsing() {
    let key = test_key();
    let uncompressed = public_key_bytes(&key.public_key());
    assert_eq!(parse_public_key(&uncompressed).unwrap(), key.public_key());
    assert!(parse_public_key(&uncompressed[..64]).is_err());
}

#[test]
fn test_blob_json_is_hex() {
    let blob = encrypt_share(&test_key().public_key(), &fixed_share()).unwrap();
    let json = serde_json::to_string(&blob).unwrap();
    assert_eq!(json, format!("\"{}\"", hex::encode(blob.to_bytes())));

    let back: EncryptedShare = serde_json::from_str(&json).unwrap();
    assert_eq!(back, blob);
}
