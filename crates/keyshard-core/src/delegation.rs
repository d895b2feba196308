//! Delegated store authorization
//!
//! Lets a third party submit a store on the owner's behalf. The owner signs a
//! typed digest that binds the registry, the exact share blobs, the
//! threshold, a per-owner nonce and a deadline:
//!
//! ```text
//! domainSeparator = keccak256("KeyshardRegistry" || registry)
//! sharesHash      = keccak256(keccak256(blob_0) || ... || keccak256(blob_n-1))
//! structHash      = keccak256(TYPEHASH || owner || sharesHash || u32 T || u64 nonce || i64 deadline)
//! digest          = keccak256(0x19 0x01 || domainSeparator || structHash)
//! ```
//!
//! The signature is a recoverable secp256k1 ECDSA signature over `digest`;
//! the recovered address must equal the owner.

use crate::crypto::EncryptedShare;
use crate::types::{keccak256, keccak256_concat, Address};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};

const DOMAIN_NAME: &[u8] = b"KeyshardRegistry";
const DELEGATED_STORE_TYPE: &[u8] =
    b"DelegatedStore(address owner,bytes32 sharesHash,uint32 threshold,uint64 nonce,int64 deadline)";

/// Recoverable ECDSA signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationSignature {
    /// R component
    #[serde(with = "hex::serde")]
    pub r: [u8; 32],
    /// S component (low-s)
    #[serde(with = "hex::serde")]
    pub s: [u8; 32],
    /// Recovery ID (0 or 1)
    pub recovery_id: u8,
}

impl DelegationSignature {
    /// `r || s || v` with `v = recovery_id + 27`
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.recovery_id + 27;
        out
    }

    /// Parse `r || s || v`, accepting `v` as 0/1 or 27/28
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(Error::Validation(format!(
                "signature must be 65 bytes, got {}",
                bytes.len()
            )));
        }
        let v = bytes[64];
        let recovery_id = if v >= 27 { v - 27 } else { v };
        if recovery_id > 1 {
            return Err(Error::Validation(format!("invalid recovery id {}", v)));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, recovery_id })
    }
}

/// Owner's authorization for a store submitted by someone else
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedStore {
    /// Owner the shares belong to
    pub owner: Address,
    /// Signature is void after this instant
    pub deadline: DateTime<Utc>,
    /// Must equal the owner's current delegation nonce
    pub nonce: u64,
    /// Owner's signature over the store digest
    pub signature: DelegationSignature,
}

impl DelegatedStore {
    /// Sign a delegated store with the owner's key
    pub fn sign(
        owner_key: &SecretKey,
        registry: &Address,
        shares: &[EncryptedShare],
        threshold: usize,
        nonce: u64,
        deadline: DateTime<Utc>,
    ) -> Result<Self> {
        let owner = Address::from_public_key(&owner_key.public_key());
        let digest = store_digest(registry, &owner, shares, threshold, nonce, deadline);
        Ok(Self {
            owner,
            deadline,
            nonce,
            signature: sign_digest(owner_key, &digest)?,
        })
    }

    /// Check the signature recovers to the owner
    pub fn verify_signer(
        &self,
        registry: &Address,
        shares: &[EncryptedShare],
        threshold: usize,
    ) -> Result<()> {
        let digest = store_digest(registry, &self.owner, shares, threshold, self.nonce, self.deadline);
        let signer = recover_signer(&digest, &self.signature)?;
        if signer != self.owner {
            return Err(Error::Unauthorized(format!(
                "delegation signed by {}, not owner {}",
                signer, self.owner
            )));
        }
        Ok(())
    }
}

/// Domain separator for a registry instance
pub fn domain_separator(registry: &Address) -> [u8; 32] {
    keccak256_concat(&[DOMAIN_NAME, registry.as_bytes()])
}

/// Hash committing to every blob, in order
pub fn shares_hash(shares: &[EncryptedShare]) -> [u8; 32] {
    let digests: Vec<[u8; 32]> = shares.iter().map(EncryptedShare::digest).collect();
    let parts: Vec<&[u8]> = digests.iter().map(|d| d.as_slice()).collect();
    keccak256_concat(&parts)
}

/// Digest the owner signs for a delegated store
pub fn store_digest(
    registry: &Address,
    owner: &Address,
    shares: &[EncryptedShare],
    threshold: usize,
    nonce: u64,
    deadline: DateTime<Utc>,
) -> [u8; 32] {
    let struct_hash = keccak256_concat(&[
        &keccak256(DELEGATED_STORE_TYPE),
        owner.as_bytes(),
        &shares_hash(shares),
        &(threshold as u32).to_be_bytes(),
        &nonce.to_be_bytes(),
        &deadline.timestamp().to_be_bytes(),
    ]);
    keccak256_concat(&[b"\x19\x01", &domain_separator(registry), &struct_hash])
}

/// Sign a 32-byte digest
pub fn sign_digest(key: &SecretKey, digest: &[u8; 32]) -> Result<DelegationSignature> {
    let signing_key = SigningKey::from(key);
    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(digest)
        .map_err(|e| Error::Crypto(format!("signing failed: {}", e)))?;

    let bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);

    Ok(DelegationSignature {
        r,
        s,
        recovery_id: recovery_id.to_byte(),
    })
}

/// Address whose key produced `signature` over `digest`
pub fn recover_signer(digest: &[u8; 32], signature: &DelegationSignature) -> Result<Address> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&signature.r);
    bytes[32..].copy_from_slice(&signature.s);

    let sig = Signature::from_slice(&bytes)
        .map_err(|e| Error::Validation(format!("malformed signature: {}", e)))?;
    let recovery_id = RecoveryId::from_byte(signature.recovery_id)
        .ok_or_else(|| Error::Validation(format!("invalid recovery id {}", signature.recovery_id)))?;

    let verifying_key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|_| Error::Unauthorized("signature does not recover to a key".into()))?;

    Ok(Address::from_public_key(&PublicKey::from(&verifying_key)))
}
