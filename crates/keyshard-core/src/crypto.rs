//! Per-share encryption
//!
//! Each share is sealed for the owner's secp256k1 public key:
//!
//! 1. generate an ephemeral key pair
//! 2. ECDH with the owner's key; take the shared point's x-coordinate
//! 3. HKDF-SHA256 over it (salted with the ephemeral public key) → 256-bit key
//! 4. AES-256-GCM with a random 16-byte IV and 128-bit tag
//!
//! ## Wire format
//!
//! ```text
//! IV (16) || ephemeral public key (65, uncompressed) || ciphertext (var) || tag (16)
//! ```
//!
//! There are no length prefixes; the fixed-size fields are cut from each end.
//!
//! ## Payload
//!
//! The encrypted payload carries its own checksum so a bug in the AEAD path
//! cannot silently hand back a corrupted share:
//!
//! ```text
//! version (1) || index (1) || value (32) || SHA-256(index || value) (32)
//! ```
//!
//! Decryption fails closed: a tag mismatch, an unparsable ephemeral key or a
//! checksum mismatch all yield [`Error::Integrity`] and no plaintext.

use crate::field::FieldElement;
use crate::shamir::Share;
use crate::{Error, Result};
use aes_gcm::{
    aead::{consts::U16, AeadInPlace, KeyInit},
    aes::Aes256,
    AesGcm, Key, Nonce, Tag,
};
use hkdf::Hkdf;
use k256::{
    ecdh::{diffie_hellman, EphemeralSecret},
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey, SecretKey,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

/// IV length in bytes
pub const IV_LEN: usize = 16;

/// Uncompressed SEC1 public key length in bytes
pub const EPHEMERAL_KEY_LEN: usize = 65;

/// AEAD tag length in bytes
pub const TAG_LEN: usize = 16;

/// Smallest possible blob (empty ciphertext)
pub const MIN_BLOB_LEN: usize = IV_LEN + EPHEMERAL_KEY_LEN + TAG_LEN;

const PAYLOAD_VERSION: u8 = 1;
const PAYLOAD_LEN: usize = 1 + 1 + 32 + 32;
const HKDF_INFO: &[u8] = b"keyshard/share-encryption/v1";

/// AES-256-GCM with a 16-byte nonce
type ShareCipher = AesGcm<Aes256, U16>;

/// An encrypted share as stored by a custodian
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedShare {
    /// Random AEAD IV
    pub iv: [u8; IV_LEN],
    /// Ephemeral public key, uncompressed SEC1
    pub ephemeral_public_key: [u8; EPHEMERAL_KEY_LEN],
    /// AEAD ciphertext without tag
    pub ciphertext: Vec<u8>,
    /// AEAD authentication tag
    pub auth_tag: [u8; TAG_LEN],
}

impl EncryptedShare {
    /// Serialize to the wire format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MIN_BLOB_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ephemeral_public_key);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.auth_tag);
        out
    }

    /// Parse the wire format by fixed offsets from both ends
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_BLOB_LEN {
            return Err(Error::Validation(format!(
                "encrypted share is {} bytes, minimum is {}",
                bytes.len(),
                MIN_BLOB_LEN
            )));
        }

        let tag_start = bytes.len() - TAG_LEN;
        let body_start = IV_LEN + EPHEMERAL_KEY_LEN;

        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&bytes[..IV_LEN]);
        let mut ephemeral_public_key = [0u8; EPHEMERAL_KEY_LEN];
        ephemeral_public_key.copy_from_slice(&bytes[IV_LEN..body_start]);
        let mut auth_tag = [0u8; TAG_LEN];
        auth_tag.copy_from_slice(&bytes[tag_start..]);

        Ok(Self {
            iv,
            ephemeral_public_key,
            ciphertext: bytes[body_start..tag_start].to_vec(),
            auth_tag,
        })
    }

    /// Total wire length
    pub fn len(&self) -> usize {
        MIN_BLOB_LEN + self.ciphertext.len()
    }

    /// Whether the ciphertext is empty (never true for a sealed share)
    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Keccak-256 of the wire bytes, used in registry digests
    pub fn digest(&self) -> [u8; 32] {
        crate::types::keccak256(&self.to_bytes())
    }
}

impl fmt::Debug for EncryptedShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedShare")
            .field("iv", &hex::encode(self.iv))
            .field("ephemeral_public_key", &hex::encode(self.ephemeral_public_key))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl Serialize for EncryptedShare {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for EncryptedShare {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)?;
        EncryptedShare::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Parse a SEC1-encoded secp256k1 public key (65-byte uncompressed or 33-byte compressed)
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|e| Error::Validation(format!("invalid public key: {}", e)))
}

/// Uncompressed SEC1 encoding of a public key
pub fn public_key_bytes(public_key: &PublicKey) -> [u8; EPHEMERAL_KEY_LEN] {
    let mut out = [0u8; EPHEMERAL_KEY_LEN];
    out.copy_from_slice(public_key.to_encoded_point(false).as_bytes());
    out
}

/// Encrypt a share for the owner's public key
pub fn encrypt_share(owner_public_key: &PublicKey, share: &Share) -> Result<EncryptedShare> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public_key = public_key_bytes(&ephemeral.public_key());

    let shared = ephemeral.diffie_hellman(owner_public_key);
    let key = derive_key(shared.raw_secret_bytes().as_slice(), &ephemeral_public_key)?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = encode_payload(share);
    let cipher = ShareCipher::new(Key::<ShareCipher>::from_slice(key.as_slice()));
    let tag = cipher
        .encrypt_in_place_detached(
            Nonce::<U16>::from_slice(&iv),
            &ephemeral_public_key,
            buffer.as_mut(),
        )
        .map_err(|e| Error::Crypto(format!("share encryption failed: {}", e)))?;

    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(tag.as_slice());

    Ok(EncryptedShare {
        iv,
        ephemeral_public_key,
        ciphertext: buffer.to_vec(),
        auth_tag,
    })
}

/// Decrypt a share with the owner's private key
pub fn decrypt_share(owner_secret_key: &SecretKey, blob: &EncryptedShare) -> Result<Share> {
    let ephemeral = PublicKey::from_sec1_bytes(&blob.ephemeral_public_key)
        .map_err(|_| Error::Integrity("ephemeral public key is corrupted".into()))?;

    let shared = diffie_hellman(owner_secret_key.to_nonzero_scalar(), ephemeral.as_affine());
    let key = derive_key(shared.raw_secret_bytes().as_slice(), &blob.ephemeral_public_key)?;

    let mut buffer = Zeroizing::new(blob.ciphertext.clone());
    let cipher = ShareCipher::new(Key::<ShareCipher>::from_slice(key.as_slice()));
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&blob.iv),
            &blob.ephemeral_public_key,
            buffer.as_mut(),
            Tag::from_slice(&blob.auth_tag),
        )
        .map_err(|_| Error::Integrity("authentication tag mismatch".into()))?;

    decode_payload(&buffer)
}

fn derive_key(shared_x: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_x);
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf.expand(HKDF_INFO, key.as_mut())
        .map_err(|e| Error::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

fn share_checksum(index: u8, value: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([index]);
    hasher.update(value);
    hasher.finalize().into()
}

fn encode_payload(share: &Share) -> Zeroizing<Vec<u8>> {
    let mut value = share.value.to_bytes();
    let checksum = share_checksum(share.index, &value);

    let mut payload = Zeroizing::new(Vec::with_capacity(PAYLOAD_LEN));
    payload.push(PAYLOAD_VERSION);
    payload.push(share.index);
    payload.extend_from_slice(&value);
    payload.extend_from_slice(&checksum);

    value.zeroize();
    payload
}

fn decode_payload(payload: &[u8]) -> Result<Share> {
    if payload.len() != PAYLOAD_LEN || payload[0] != PAYLOAD_VERSION {
        return Err(Error::Integrity("malformed share payload".into()));
    }

    let index = payload[1];
    let mut value = [0u8; 32];
    value.copy_from_slice(&payload[2..34]);

    let expected = share_checksum(index, &value);
    if !bool::from(expected.ct_eq(&payload[34..66])) {
        value.zeroize();
        return Err(Error::Integrity("share checksum mismatch".into()));
    }

    let element = FieldElement::from_canonical_bytes(&value)
        .map_err(|_| Error::Integrity("share value out of range".into()));
    value.zeroize();

    Ok(Share::new(index, element?))
}
