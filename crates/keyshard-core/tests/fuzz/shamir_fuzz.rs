//! Fuzz tests for splitting and reconstruction
//!
//! Property-based testing over random secrets, share counts and subsets.

use keyshard_core::{reconstruct, reconstruct_secret, split, ErrorKind, Secret, Share};
use proptest::prelude::*;

// ============================================================================
// Strategies for generating test data
// ============================================================================

/// Random secret of 1..=31 bytes, always below the field modulus
fn secret_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=31)
}

/// `(n, t)` with `2 <= t <= n <= 100`
fn parameters_strategy() -> impl Strategy<Value = (usize, usize)> {
    (2usize..=100).prop_flat_map(|n| (Just(n), 2usize..=n))
}

/// Parameters plus a seed to shuffle which shares are picked
fn subset_strategy() -> impl Strategy<Value = (usize, usize, Vec<u8>, u64)> {
    (parameters_strategy(), secret_strategy(), any::<u64>())
        .prop_map(|((n, t), secret, seed)| (n, t, secret, seed))
}

/// Deterministically pick `count` distinct shares using `seed`
fn choose(shares: &[Share], count: usize, seed: u64) -> Vec<Share> {
    let mut order: Vec<usize> = (0..shares.len()).collect();
    let mut state = seed | 1;
    for i in (1..order.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        order.swap(i, (state % (i as u64 + 1)) as usize);
    }
    order[..count].iter().map(|&i| shares[i].clone()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Any `t` shares recover the secret exactly
    #[test]
    fn any_threshold_subset_reconstructs((n, t, bytes, seed) in subset_strategy()) {
        let secret = Secret::new(bytes.clone());
        let shares = split(&secret, n, t).unwrap();
        prop_assert_eq!(shares.len(), n);

        let subset = choose(&shares, t, seed);
        let recovered = reconstruct_secret(&subset, t, bytes.len()).unwrap();
        prop_assert_eq!(recovered.as_bytes(), bytes.as_slice());
    }

    /// Two different subsets agree
    #[test]
    fn subsets_agree((n, t, bytes, seed) in subset_strategy()) {
        let shares = split(&Secret::new(bytes), n, t).unwrap();

        let a = reconstruct(&choose(&shares, t, seed), t).unwrap();
        let b = reconstruct(&choose(&shares, t, seed.wrapping_mul(31).wrapping_add(7)), t).unwrap();
        prop_assert_eq!(a, b);
    }

    /// `t - 1` shares are rejected
    #[test]
    fn too_few_shares_fail((n, t, bytes, seed) in subset_strategy()) {
        let shares = split(&Secret::new(bytes), n, t).unwrap();
        let subset = choose(&shares, t - 1, seed);

        let err = reconstruct(&subset, t).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Validation);
    }

    /// A repeated x-coordinate is rejected
    #[test]
    fn duplicate_index_fails((n, t, bytes, seed) in subset_strategy()) {
        let shares = split(&Secret::new(bytes), n, t).unwrap();
        let mut subset = choose(&shares, t - 1, seed);
        subset.push(subset[0].clone());

        let err = reconstruct(&subset, t).unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Validation);
    }

    /// Share indices are exactly 1..=n
    #[test]
    fn indices_are_contiguous((n, t) in parameters_strategy()) {
        let shares = split(&Secret::new(vec![9u8; 16]), n, t).unwrap();
        let indices: Vec<usize> = shares.iter().map(|s| s.index as usize).collect();
        prop_assert_eq!(indices, (1..=n).collect::<Vec<_>>());
    }
}
