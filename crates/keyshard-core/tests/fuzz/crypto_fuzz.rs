//! Fuzz tests for share sealing
//!
//! Every single-byte corruption of a sealed share must be detected.

use k256::SecretKey;
use keyshard_core::{
    decrypt_share, encrypt_share, field::FieldElement, EncryptedShare, ErrorKind, Share,
};
use proptest::prelude::*;

fn test_key() -> SecretKey {
    SecretKey::from_slice(&[0x17; 32]).unwrap()
}

// ============================================================================
// Strategies for generating test data
// ============================================================================

fn share_strategy() -> impl Strategy<Value = Share> {
    (1u8..=100, prop::array::uniform32(any::<u8>()))
        .prop_map(|(index, bytes)| Share::new(index, FieldElement::from_be_bytes_reduced(&bytes)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Decrypting a sealed share returns it unchanged
    #[test]
    fn seal_then_open(share in share_strategy()) {
        let key = test_key();
        let blob = encrypt_share(&key.public_key(), &share).unwrap();
        prop_assert_eq!(decrypt_share(&key, &blob).unwrap(), share);
    }

    /// Flipping any byte of the wire blob fails closed
    #[test]
    fn any_byte_flip_is_integrity_error(
        share in share_strategy(),
        position in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let key = test_key();
        let blob = encrypt_share(&key.public_key(), &share).unwrap();

        let mut bytes = blob.to_bytes();
        let at = position.index(bytes.len());
        bytes[at] ^= mask;

        let tampered = EncryptedShare::from_bytes(&bytes).unwrap();
        let err = decrypt_share(&key, &tampered).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    /// Parsing arbitrary bytes never panics
    #[test]
    fn parse_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        match EncryptedShare::from_bytes(&bytes) {
            Ok(blob) => prop_assert_eq!(blob.to_bytes(), bytes),
            Err(e) => prop_assert_eq!(e.kind(), ErrorKind::Validation),
        }
    }
}
