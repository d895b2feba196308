//! Threshold secret sharing over the secp256k1 scalar field
//!
//! A secret of up to 32 bytes is read as a field element `s` and hidden as
//! the constant term of a random polynomial of degree `t - 1`. Share `x` is
//! the polynomial evaluated at `x ∈ [1, n]`. Any `t` shares recover `s` by
//! Lagrange interpolation at zero; fewer reveal nothing about it.
//!
//! Splitting always uses the local CSPRNG (`OsRng`). Caller-supplied entropy
//! can be mixed in through [`ExtraEntropy`], but it only ever perturbs
//! coefficients that were already drawn from the CSPRNG.

use crate::field::FieldElement;
use crate::types::MAX_SECRET_LEN;
use crate::{Error, Result, Secret};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod entropy;
mod reconstruct;
mod split;

pub use entropy::ExtraEntropy;
pub use reconstruct::{reconstruct, reconstruct_secret, verify_against_public_key};
pub use split::{split, split_with_entropy};

/// Smallest threshold accepted by the scheme
pub const MIN_THRESHOLD: usize = 2;

/// Largest number of shares a single split may produce
pub const MAX_SHARES: usize = 100;

/// One point `(x, y)` on the sharing polynomial
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// x-coordinate, in `1..=n`
    pub index: u8,
    /// y-coordinate
    pub value: FieldElement,
}

impl Share {
    /// Create a share
    pub fn new(index: u8, value: FieldElement) -> Self {
        Self { index, value }
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Check `2 <= threshold <= total <= MAX_SHARES`
pub fn validate_parameters(total: usize, threshold: usize) -> Result<()> {
    if threshold < MIN_THRESHOLD {
        return Err(Error::Validation(format!(
            "threshold must be at least {}, got {}",
            MIN_THRESHOLD, threshold
        )));
    }
    if threshold > total {
        return Err(Error::Validation(format!(
            "threshold {} exceeds share count {}",
            threshold, total
        )));
    }
    if total > MAX_SHARES {
        return Err(Error::Validation(format!(
            "share count {} exceeds maximum of {}",
            total, MAX_SHARES
        )));
    }
    Ok(())
}

/// Read a secret as a field element
///
/// The secret must be 1..=32 bytes and its big-endian value must lie below
/// the modulus, otherwise reconstruction could not return it unchanged.
pub(crate) fn secret_to_field(secret: &Secret) -> Result<FieldElement> {
    if secret.is_empty() {
        return Err(Error::Validation("secret must not be empty".into()));
    }
    if secret.len() > MAX_SECRET_LEN {
        return Err(Error::Validation(format!(
            "secret is {} bytes, maximum is {}",
            secret.len(),
            MAX_SECRET_LEN
        )));
    }

    let mut padded = [0u8; 32];
    padded[32 - secret.len()..].copy_from_slice(secret.as_bytes());
    let canonical = FieldElement::from_canonical_bytes(&padded);
    padded.zeroize();
    canonical.map_err(|_| Error::Validation("secret is not below the field modulus".into()))?;

    Ok(FieldElement::from_be_bytes_reduced(secret.as_bytes()))
}
