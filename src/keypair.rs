//! X25519 ratchet key pairs and validated key agreement.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{RatchetError, Result};
use crate::secret::SecretKey;
use crate::types::PUBLIC_KEY_LEN;

/// An ephemeral ratchet key pair.
///
/// The private half wipes itself on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RatchetKeyPair {
    secret: StaticSecret,
    #[zeroize(skip)]
    public: PublicKey,
}

impl RatchetKeyPair {
    /// Generate a new X25519 key pair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public.to_bytes()
    }

    /// Compute the shared value with a remote public key
    pub fn agree(&self, remote: &PublicKey) -> Result<SecretKey> {
        agree(&self.secret, remote)
    }

    #[cfg(test)]
    pub(crate) fn secret_is_zeroed(&self) -> bool {
        self.secret.as_bytes() == &[0u8; 32]
    }
}

impl std::fmt::Debug for RatchetKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetKeyPair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

/// Compute an X25519 shared value
///
/// Rejects peer keys that force a non-contributory result (the all-zero
/// point and the other small-order points), which would otherwise let a peer
/// pin the output.
pub fn agree(private: &StaticSecret, public: &PublicKey) -> Result<SecretKey> {
    let shared = private.diffie_hellman(public);
    if !shared.was_contributory() {
        return Err(RatchetError::InvalidPublicKey(
            "small-order point rejected".into(),
        ));
    }
    SecretKey::from_slice(shared.as_bytes())
}

/// Parse a peer's 32-byte ratchet public key
pub fn parse_public(bytes: &[u8]) -> Result<PublicKey> {
    let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
        RatchetError::InvalidPublicKey(format!(
            "expected {} bytes, got {}",
            PUBLIC_KEY_LEN,
            bytes.len()
        ))
    })?;
    if arr == [0u8; PUBLIC_KEY_LEN] {
        return Err(RatchetError::InvalidPublicKey("all-zero key".into()));
    }
    Ok(PublicKey::from(arr))
}
