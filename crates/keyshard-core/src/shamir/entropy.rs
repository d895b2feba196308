//! Caller-supplied entropy mixed into polynomial coefficients

use crate::field::FieldElement;
use crate::Address;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

const DOMAIN: &[u8] = b"keyshard/coefficient-mask/v1";

/// Additional entropy hashed into every random coefficient
///
/// Each coefficient is `r + H(domain || timestamp || caller || extra || i)`
/// where `r` comes from the OS CSPRNG. Adding a known value to a uniform
/// field element keeps it uniform, so weak or attacker-chosen input here
/// never lowers the strength of the split.
#[derive(Clone, Default)]
pub struct ExtraEntropy {
    /// Unix timestamp (seconds) of the request
    pub timestamp: i64,
    /// Identity of the requester, if known
    pub caller: Option<Address>,
    /// Arbitrary extra randomness (hardware RNG output, user input, ...)
    pub extra: Vec<u8>,
}

impl ExtraEntropy {
    /// Create an entropy bundle
    pub fn new(timestamp: i64, caller: Option<Address>, extra: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            caller,
            extra: extra.into(),
        }
    }

    /// Mask for coefficient `i`
    pub(crate) fn mask(&self, coefficient_index: usize) -> FieldElement {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);
        hasher.update(self.timestamp.to_be_bytes());
        match &self.caller {
            Some(caller) => {
                hasher.update([1u8]);
                hasher.update(caller.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update((self.extra.len() as u64).to_be_bytes());
        hasher.update(&self.extra);
        hasher.update((coefficient_index as u64).to_be_bytes());

        let mut digest: [u8; 32] = hasher.finalize().into();
        let mask = FieldElement::from_be_bytes_reduced(&digest);
        digest.zeroize();
        mask
    }
}

impl Drop for ExtraEntropy {
    fn drop(&mut self) {
        self.extra.zeroize();
    }
}

impl std::fmt::Debug for ExtraEntropy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtraEntropy")
            .field("timestamp", &self.timestamp)
            .field("caller", &self.caller)
            .field("extra_len", &self.extra.len())
            .finish()
    }
}
