//! Key derivation functions using HKDF-SHA256 and HMAC-SHA256.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{RatchetError, Result};
use crate::secret::SecretKey;
use crate::types::{CHAIN_KEY_SEED, KEY_LEN, MESSAGE_KEY_SEED, ROOT_KEY_INFO, ROOT_STEP_INFO};

type HmacSha256 = Hmac<Sha256>;

/// HKDF-SHA256 extract-then-expand
///
/// Output longer than one hash block is produced by the usual counter-based
/// block expansion. Fails only when `length` exceeds 255 * 32 bytes.
///
/// # Arguments
/// * `secret` - Input keying material
/// * `salt` - Extraction salt
/// * `info` - Context label
/// * `length` - Output length in bytes
pub fn expand(
    secret: &[u8],
    salt: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), secret);
    let mut out = Zeroizing::new(vec![0u8; length]);
    hk.expand(info, &mut out).map_err(|_| {
        RatchetError::KeyDerivation(format!("{} bytes exceeds the HKDF output limit", length))
    })?;
    Ok(out)
}

/// Derives the initial root key from the handshake output
///
/// RK = HKDF(SS, salt = 0^32, "RootKey")
///
/// # Arguments
/// * `shared_secret` - Output of the out-of-band key agreement, at least 32 bytes
pub fn derive_root_key(shared_secret: &[u8]) -> Result<SecretKey> {
    if shared_secret.len() < KEY_LEN {
        return Err(RatchetError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: shared_secret.len(),
        });
    }
    let okm = expand(shared_secret, &[0u8; KEY_LEN], ROOT_KEY_INFO, KEY_LEN)?;
    SecretKey::from_slice(&okm)
}

/// Mixes fresh DH output into the root key
///
/// RK' || CK = HKDF(RK || DH, "RootStep"), 64 bytes split in half
///
/// # Returns
/// Tuple of (next_root_key, next_chain_key)
pub fn root_step(root_key: &SecretKey, dh_output: &[u8]) -> (SecretKey, SecretKey) {
    let mut ikm = Zeroizing::new(Vec::with_capacity(KEY_LEN + dh_output.len()));
    ikm.extend_from_slice(root_key.as_bytes());
    ikm.extend_from_slice(dh_output);

    let hk = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = [0u8; 2 * KEY_LEN];
    hk.expand(ROOT_STEP_INFO, &mut okm)
        .expect("HKDF expansion should not fail with valid length");

    let mut rk = [0u8; KEY_LEN];
    let mut ck = [0u8; KEY_LEN];
    rk.copy_from_slice(&okm[..KEY_LEN]);
    ck.copy_from_slice(&okm[KEY_LEN..]);
    okm.zeroize();

    (SecretKey::new(rk), SecretKey::new(ck))
}

/// Advances a chain by one message
///
/// CK' = HMAC(CK, 0x02), MK = HMAC(CK, 0x01)
///
/// # Returns
/// Tuple of (next_chain_key, message_key)
pub fn chain_step(chain_key: &SecretKey) -> (SecretKey, SecretKey) {
    let next = hmac_label(chain_key, CHAIN_KEY_SEED);
    let mk = hmac_label(chain_key, MESSAGE_KEY_SEED);
    (next, mk)
}

fn hmac_label(key: &SecretKey, label: u8) -> SecretKey {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(&[label]);
    let mut out: [u8; KEY_LEN] = mac.finalize().into_bytes().into();
    let key = SecretKey::new(out);
    out.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_rfc5869_case_1() {
        let ikm = [0x0bu8; 22];
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let info = hex::decode("f0f1f2f3f4f5f6f7f8f9").unwrap();

        let okm = expand(&ikm, &salt, &info, 42).unwrap();
        assert_eq!(
            hex::encode(&*okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[test]
    fn test_expand_rfc5869_case_2_multi_block() {
        let ikm: Vec<u8> = (0x00..=0x4f).collect();
        let salt: Vec<u8> = (0x60..=0xaf).collect();
        let info: Vec<u8> = (0xb0..=0xff).collect();

        // 82 bytes spans three SHA-256 blocks
        let okm = expand(&ikm, &salt, &info, 82).unwrap();
        assert_eq!(
            hex::encode(&*okm),
            "b11e398dc80327a1c8e7f78c596a49344f012eda2d4efad8a050cc4c19afa97c\
             59045a99cac7827271cb41c65e590e09da3275600c2f09b8367793a9aca3db71\
             cc30c58179ec3e87c14c01d5c1f3434f1d87"
        );
    }

    #[test]
    fn test_expand_rejects_oversized_output() {
        let result = expand(&[1u8; 32], &[], b"x", 255 * 32 + 1);
        assert!(matches!(result, Err(RatchetError::KeyDerivation(_))));
    }

    #[test]
    fn test_derive_root_key() {
        let rk1 = derive_root_key(&[7u8; 32]).unwrap();
        let rk2 = derive_root_key(&[7u8; 32]).unwrap();
        assert_eq!(rk1.as_bytes(), rk2.as_bytes());

        let other = derive_root_key(&[8u8; 32]).unwrap();
        assert_ne!(rk1.as_bytes(), other.as_bytes());
    }

    #[test]
    fn test_derive_root_key_rejects_short_secret() {
        assert!(matches!(
            derive_root_key(&[]),
            Err(RatchetError::InvalidKeyLength { actual: 0, .. })
        ));
        assert!(derive_root_key(&[1u8; 16]).is_err());
        assert!(derive_root_key(&[1u8; 64]).is_ok());
    }

    #[test]
    fn test_chain_step() {
        let ck = SecretKey::new([1u8; KEY_LEN]);
        let (next, mk) = chain_step(&ck);

        // Deterministic
        let (next2, mk2) = chain_step(&ck);
        assert_eq!(next.as_bytes(), next2.as_bytes());
        assert_eq!(mk.as_bytes(), mk2.as_bytes());

        // Distinct outputs
        assert_ne!(next.as_bytes(), mk.as_bytes());
        assert_ne!(next.as_bytes(), ck.as_bytes());

        // Chain moves forward
        let (_, mk_next) = chain_step(&next);
        assert_ne!(mk.as_bytes(), mk_next.as_bytes());
    }

    #[test]
    fn test_chain_step_matches_hmac_definition() {
        let ck = SecretKey::new([9u8; KEY_LEN]);
        let (next, mk) = chain_step(&ck);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&[9u8; KEY_LEN]).unwrap();
        mac.update(&[0x01]);
        let expected_mk = mac.finalize().into_bytes();
        assert_eq!(mk.as_bytes()[..], expected_mk[..]);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&[9u8; KEY_LEN]).unwrap();
        mac.update(&[0x02]);
        let expected_next = mac.finalize().into_bytes();
        assert_eq!(next.as_bytes()[..], expected_next[..]);
    }

    #[test]
    fn test_root_step() {
        let rk = SecretKey::new([1u8; KEY_LEN]);
        let (rk1, ck1) = root_step(&rk, &[2u8; 32]);
        let (rk1b, ck1b) = root_step(&rk, &[2u8; 32]);
        assert_eq!(rk1.as_bytes(), rk1b.as_bytes());
        assert_eq!(ck1.as_bytes(), ck1b.as_bytes());

        assert_ne!(rk1.as_bytes(), rk.as_bytes());
        assert_ne!(rk1.as_bytes(), ck1.as_bytes());

        let (rk2, _) = root_step(&rk, &[3u8; 32]);
        assert_ne!(rk1.as_bytes(), rk2.as_bytes());
    }
}
