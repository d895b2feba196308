//! Splitting a secret into shares

use super::{secret_to_field, validate_parameters, ExtraEntropy, Share};
use crate::field::{evaluate_polynomial, FieldElement};
use crate::{Result, Secret};
use k256::{elliptic_curve::Field, Scalar};
use rand::rngs::OsRng;
use tracing::debug;
use zeroize::Zeroizing;

/// Split `secret` into `total` shares, any `threshold` of which recover it
pub fn split(secret: &Secret, total: usize, threshold: usize) -> Result<Vec<Share>> {
    split_with_entropy(secret, total, threshold, None)
}

/// Split with optional caller-supplied entropy mixed into the coefficients
///
/// # Arguments
/// * `secret` - 1..=32 bytes, big-endian value below the field modulus
/// * `total` - number of shares `n`
/// * `threshold` - shares required to reconstruct `t`, `2 <= t <= n <= 100`
/// * `entropy` - optional defense-in-depth entropy, never a substitute for the CSPRNG
pub fn split_with_entropy(
    secret: &Secret,
    total: usize,
    threshold: usize,
    entropy: Option<&ExtraEntropy>,
) -> Result<Vec<Share>> {
    validate_parameters(total, threshold)?;

    let coefficients = generate_polynomial(secret, threshold, entropy)?;

    let shares = (1..=total)
        .map(|x| {
            let y = evaluate_polynomial(&coefficients, FieldElement::from_u64(x as u64));
            Share::new(x as u8, y)
        })
        .collect();

    debug!(total, threshold, "split secret into shares");

    Ok(shares)
}

/// Coefficients `[secret, r1, ..., r_{t-1}]`, zeroed when dropped
fn generate_polynomial(
    secret: &Secret,
    threshold: usize,
    entropy: Option<&ExtraEntropy>,
) -> Result<Zeroizing<Vec<FieldElement>>> {
    let mut rng = OsRng;
    let mut coefficients = Zeroizing::new(Vec::with_capacity(threshold));
    coefficients.push(secret_to_field(secret)?);

    for i in 1..threshold {
        let mut coefficient = FieldElement::from_scalar(Scalar::random(&mut rng));
        if let Some(entropy) = entropy {
            coefficient = coefficient + entropy.mask(i);
        }
        coefficients.push(coefficient);
    }

    Ok(coefficients)
}
