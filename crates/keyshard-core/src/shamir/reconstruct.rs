//! Lagrange interpolation at zero
//!
//! ```text
//! s = Σ_i  y_i · Π_{j≠i} (0 - x_j) / (x_i - x_j)   (mod n)
//! ```
//!
//! The inner loop visits every `j`, including `j = i`, and neutralises the
//! diagonal term by multiplying with a 0/1 mask instead of skipping it, so the
//! sequence of field operations is the same for every subset of shares.
//!
//! Interpolation cannot tell a correct result from garbage: too few or
//! mismatched shares simply yield a different field element. Use
//! [`verify_against_public_key`] when the secret is a private key.

use super::{Share, MIN_THRESHOLD};
use crate::field::FieldElement;
use crate::{Error, Result, Secret};
use k256::{PublicKey, SecretKey};
use std::collections::HashSet;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Reconstruct the secret as its 32-byte big-endian encoding
///
/// Fails with a validation error when fewer than `threshold` shares are
/// given or two shares carry the same index.
pub fn reconstruct(shares: &[Share], threshold: usize) -> Result<Secret> {
    let mut element = interpolate_at_zero(shares, threshold)?;
    let secret = Secret::new(element.to_bytes().to_vec());
    element.zeroize();
    Ok(secret)
}

/// Reconstruct a secret that was `len` bytes long when split
pub fn reconstruct_secret(shares: &[Share], threshold: usize, len: usize) -> Result<Secret> {
    if len == 0 || len > 32 {
        return Err(Error::Validation(format!(
            "secret length must be 1..=32, got {}",
            len
        )));
    }
    let full = reconstruct(shares, threshold)?;
    Ok(Secret::new(full.as_bytes()[32 - len..].to_vec()))
}

/// Check that a reconstructed private key matches the expected public key
pub fn verify_against_public_key(secret: &Secret, expected: &PublicKey) -> Result<bool> {
    let mut padded = [0u8; 32];
    if secret.is_empty() || secret.len() > 32 {
        return Err(Error::Validation("secret is not a 32-byte private key".into()));
    }
    padded[32 - secret.len()..].copy_from_slice(secret.as_bytes());
    let key = SecretKey::from_slice(&padded);
    padded.zeroize();

    match key {
        Ok(key) => Ok(key.public_key() == *expected),
        Err(_) => Ok(false),
    }
}

fn validate_shares(shares: &[Share], threshold: usize) -> Result<()> {
    if threshold < MIN_THRESHOLD {
        return Err(Error::Validation(format!(
            "threshold must be at least {}, got {}",
            MIN_THRESHOLD, threshold
        )));
    }
    if shares.len() < threshold {
        return Err(Error::Validation(format!(
            "need at least {} shares, got {}",
            threshold,
            shares.len()
        )));
    }

    // Indices are public, branching on them leaks nothing
    let mut seen = HashSet::with_capacity(shares.len());
    for share in shares {
        if share.index == 0 {
            return Err(Error::Validation("share index 0 is reserved".into()));
        }
        if !seen.insert(share.index) {
            return Err(Error::Validation(format!(
                "duplicate share index {}",
                share.index
            )));
        }
    }
    Ok(())
}

fn interpolate_at_zero(shares: &[Share], threshold: usize) -> Result<FieldElement> {
    validate_shares(shares, threshold)?;

    let xs: Vec<FieldElement> = shares
        .iter()
        .map(|s| FieldElement::from_u64(u64::from(s.index)))
        .collect();

    let mut secret = FieldElement::ZERO;

    for (i, share) in shares.iter().enumerate() {
        let mut numerator = FieldElement::ONE;
        let mut denominator = FieldElement::ONE;

        for (j, x_j) in xs.iter().enumerate() {
            let diagonal = FieldElement::from_choice(i.ct_eq(&j));
            let off_diagonal = FieldElement::ONE - diagonal;

            numerator = numerator * (off_diagonal * (FieldElement::ZERO - *x_j) + diagonal);
            denominator = denominator * (off_diagonal * (xs[i] - *x_j) + diagonal);
        }

        let inverse = Option::<FieldElement>::from(denominator.invert())
            .ok_or_else(|| Error::Validation("degenerate share set".into()))?;
        let mut term = share.value * numerator * inverse;
        secret = secret + term;

        term.zeroize();
        numerator.zeroize();
    }

    Ok(secret)
}
