//! Fixed-size secret values that wipe themselves.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{RatchetError, Result};
use crate::types::KEY_LEN;

/// A 32-byte secret (root, chain or message key).
///
/// Memory is zeroed on drop, so erasing a consumed key is a matter of letting
/// it go out of scope. Clones are independent copies and wipe themselves too.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub(crate) fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a secret out of a slice, rejecting anything but 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(RatchetError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// True once the key has been wiped
    pub fn is_zeroed(&self) -> bool {
        self.0.iter().fold(0u8, |acc, b| acc | b) == 0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}
