//! Prime field arithmetic for threshold sharing
//!
//! Elements live in the scalar field of secp256k1, i.e. integers modulo the
//! group order
//!
//! ```text
//! n = 0xFFFFFFFF_FFFFFFFF_FFFFFFFF_FFFFFFFE_BAAEDCE6_AF48A03B_BFD25E8C_D0364141
//! ```
//!
//! Addition, subtraction and multiplication delegate to `k256::Scalar`, which
//! is constant time. Inversion is a binary extended Euclidean algorithm that
//! always runs [`INVERSION_ROUNDS`] iterations and chooses between its four
//! cases with masked selects, so its running time does not depend on the
//! operand.

use crate::{Error, Result};
use k256::{
    elliptic_curve::{bigint::U256, ops::Reduce, PrimeField},
    FieldBytes, Scalar,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq, CtOption};
use zeroize::Zeroize;

/// Big-endian encoding of the field modulus
pub const MODULUS_BYTES: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
    0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

/// Big-endian encoding of `(n + 1) / 2`, the inverse of two
const INV_TWO_BYTES: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa1,
];

/// Iterations of the inversion loop.
///
/// Every halving shrinks `log2(u) + log2(v)` (at most 512 bits) by one, and
/// every subtraction is immediately followed by a halving, so 1025 rounds
/// always reach the fixpoint `(u, v) = (0, 1)`.
pub const INVERSION_ROUNDS: usize = 2 * 512 + 16;

/// An element of the prime field
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldElement(Scalar);

impl FieldElement {
    /// Additive identity
    pub const ZERO: Self = Self(Scalar::ZERO);

    /// Multiplicative identity
    pub const ONE: Self = Self(Scalar::ONE);

    /// Embed a small integer
    pub fn from_u64(value: u64) -> Self {
        Self(Scalar::from(value))
    }

    /// `1` if `choice` is set, `0` otherwise, without branching
    pub fn from_choice(choice: Choice) -> Self {
        Self::conditional_select(&Self::ZERO, &Self::ONE, choice)
    }

    /// Reduce an arbitrary big-endian byte string modulo `n`
    ///
    /// Accumulates `acc = acc * 256 + byte` one byte at a time.
    pub fn from_be_bytes_reduced(bytes: &[u8]) -> Self {
        let radix = Scalar::from(256u64);
        let mut acc = Scalar::ZERO;
        for &byte in bytes {
            acc = acc * radix + Scalar::from(u64::from(byte));
        }
        Self(acc)
    }

    /// Parse a canonical 32-byte big-endian encoding (must be below `n`)
    pub fn from_canonical_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let repr = FieldBytes::clone_from_slice(bytes);
        Option::<Scalar>::from(Scalar::from_repr(repr))
            .map(Self)
            .ok_or_else(|| Error::Validation("field element is not below the modulus".into()))
    }

    /// 32-byte big-endian encoding
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.to_bytes());
        out
    }

    /// Whether this element is zero
    pub fn is_zero(&self) -> Choice {
        self.0.ct_eq(&Scalar::ZERO)
    }

    /// Halve modulo `n`
    pub fn halve(&self) -> Self {
        Self(self.0 * inv_two())
    }

    /// Multiplicative inverse; `None` for zero
    pub fn invert(&self) -> CtOption<Self> {
        let is_zero = self.is_zero();
        CtOption::new(Self(invert_binary(&self.0)), !is_zero)
    }

    /// Access the underlying scalar
    pub fn as_scalar(&self) -> &Scalar {
        &self.0
    }

    /// Wrap a scalar
    pub fn from_scalar(scalar: Scalar) -> Self {
        Self(scalar)
    }
}

fn inv_two() -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(INV_TWO_BYTES))
}

/// Evaluate `coefficients[0] + coefficients[1]·x + ...` with Horner's method
pub fn evaluate_polynomial(coefficients: &[FieldElement], x: FieldElement) -> FieldElement {
    let mut acc = FieldElement::ZERO;
    for coefficient in coefficients.iter().rev() {
        acc = acc * x + *coefficient;
    }
    acc
}

// ============ Fixed-width limb helpers (little-endian u64 limbs) ============

type Limbs = [u64; 4];

fn limbs_from_be(bytes: &[u8; 32]) -> Limbs {
    let mut limbs = [0u64; 4];
    for (i, limb) in limbs.iter_mut().enumerate() {
        let start = 32 - (i + 1) * 8;
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[start..start + 8]);
        *limb = u64::from_be_bytes(word);
    }
    limbs
}

/// `a - b` with the final borrow (0 or 1)
fn limbs_sub(a: &Limbs, b: &Limbs) -> (Limbs, u64) {
    let mut out = [0u64; 4];
    let mut borrow = 0u64;
    for i in 0..4 {
        let (d1, b1) = a[i].overflowing_sub(b[i]);
        let (d2, b2) = d1.overflowing_sub(borrow);
        out[i] = d2;
        borrow = u64::from(b1) | u64::from(b2);
    }
    (out, borrow)
}

fn limbs_shr1(a: &Limbs) -> Limbs {
    let mut out = [0u64; 4];
    for i in 0..4 {
        let carry = if i < 3 { a[i + 1] << 63 } else { 0 };
        out[i] = (a[i] >> 1) | carry;
    }
    out
}

fn limbs_select(a: &Limbs, b: &Limbs, choice: Choice) -> Limbs {
    let mut out = [0u64; 4];
    for i in 0..4 {
        out[i] = u64::conditional_select(&a[i], &b[i], choice);
    }
    out
}

fn limbs_is_odd(a: &Limbs) -> Choice {
    Choice::from((a[0] & 1) as u8)
}

/// Constant-time binary extended Euclid modulo `n`.
///
/// Maintains `x1·a ≡ u` and `x2·a ≡ v (mod n)` starting from `(u, v) =
/// (a, n)`. Once `v` reaches 1 it stays there, so `x2` holds `a⁻¹`. Returns
/// zero for `a = 0`.
fn invert_binary(a: &Scalar) -> Scalar {
    let mut a_bytes = [0u8; 32];
    a_bytes.copy_from_slice(&a.to_bytes());

    let mut u = limbs_from_be(&a_bytes);
    let mut v = limbs_from_be(&MODULUS_BYTES);
    let mut x1 = Scalar::ONE;
    let mut x2 = Scalar::ZERO;
    let half = inv_two();

    for _ in 0..INVERSION_ROUNDS {
        let u_odd = limbs_is_odd(&u);
        let v_odd = limbs_is_odd(&v);
        let (u_minus_v, borrow) = limbs_sub(&u, &v);
        let (v_minus_u, _) = limbs_sub(&v, &u);
        let u_ge_v = Choice::from((borrow as u8) ^ 1);

        let halve_u = !u_odd;
        let halve_v = u_odd & !v_odd;
        let reduce_u = u_odd & v_odd & u_ge_v;
        let reduce_v = u_odd & v_odd & !u_ge_v;

        let x1_minus_x2 = x1 - x2;
        let x2_minus_x1 = x2 - x1;

        let next_u = limbs_select(&u, &limbs_shr1(&u), halve_u);
        u = limbs_select(&next_u, &u_minus_v, reduce_u);
        let next_v = limbs_select(&v, &limbs_shr1(&v), halve_v);
        v = limbs_select(&next_v, &v_minus_u, reduce_v);

        let next_x1 = Scalar::conditional_select(&x1, &(x1 * half), halve_u);
        let next_x2 = Scalar::conditional_select(&x2, &(x2 * half), halve_v);
        x1 = Scalar::conditional_select(&next_x1, &x1_minus_x2, reduce_u);
        x2 = Scalar::conditional_select(&next_x2, &x2_minus_x1, reduce_v);
    }

    a_bytes.zeroize();
    u.zeroize();
    v.zeroize();
    x1.zeroize();
    x2
}

impl ConditionallySelectable for FieldElement {
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        Self(Scalar::conditional_select(&a.0, &b.0, choice))
    }
}

impl ConstantTimeEq for FieldElement {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

impl Zeroize for FieldElement {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl Add for FieldElement {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for FieldElement {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul for FieldElement {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self(self.0 * rhs.0)
    }
}

impl Neg for FieldElement {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldElement([REDACTED])")
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        let element = FieldElement::from_canonical_bytes(&bytes).map_err(serde::de::Error::custom);
        bytes.zeroize();
        element
    }
}
