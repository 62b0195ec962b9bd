//! Authenticated key wrapping.
//!
//! A wrapped key is a 32-byte secret encrypted with AES-256-CTR and tagged
//! with HMAC-SHA256 over `IV || ciphertext`. Both keys are stretched from
//! the wrapping key with HKDF-SHA256. The tag is always verified before the
//! ciphertext is decrypted.

use aes::cipher::{KeyIvInit, StreamCipher};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::key::{password_hash, SecretKey};
use crate::error::{FsdumpError, Result};
use crate::metadata::{ProtectorData, WrappedKeyData, INTERNAL_KEY_LENGTH, IV_LENGTH};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Expand a key into independent encryption and authentication keys.
///
/// HKDF-SHA256 with no salt and empty info; the first 32 output bytes are
/// the encryption key, the next 32 the authentication key.
pub fn stretch_key(key: &SecretKey) -> Result<(SecretKey, SecretKey)> {
    let hk = Hkdf::<Sha256>::new(None, key.as_bytes());
    let mut okm = Zeroizing::new([0u8; 2 * INTERNAL_KEY_LENGTH]);
    hk.expand(&[], okm.as_mut())
        .map_err(|e| FsdumpError::Configuration(format!("HKDF expand failed: {}", e)))?;

    let mut enc = SecretKey::zeroed();
    let mut auth = SecretKey::zeroed();
    enc.as_mut_bytes().copy_from_slice(&okm[..INTERNAL_KEY_LENGTH]);
    auth.as_mut_bytes().copy_from_slice(&okm[INTERNAL_KEY_LENGTH..]);
    Ok((enc, auth))
}

fn tag(auth_key: &SecretKey, iv: &[u8], ciphertext: &[u8]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(auth_key.as_bytes())
        .map_err(|e| FsdumpError::Configuration(format!("HMAC init failed: {}", e)))?;
    mac.update(iv);
    mac.update(ciphertext);
    Ok(mac)
}

fn cipher(enc_key: &SecretKey, iv: &[u8]) -> Result<Aes256Ctr> {
    Aes256Ctr::new_from_slices(enc_key.as_bytes(), iv)
        .map_err(|e| FsdumpError::Configuration(format!("AES-CTR init failed: {}", e)))
}

/// Recover the 32-byte secret from a wrapped key.
///
/// # Errors
///
/// - `FsdumpError::Metadata` if the record's field lengths are wrong
/// - `FsdumpError::Integrity` if the HMAC does not verify; nothing is decrypted
pub fn unwrap(wrapped: &WrappedKeyData, wrapping_key: &SecretKey) -> Result<SecretKey> {
    wrapped.validate()?;
    let (enc_key, auth_key) = stretch_key(wrapping_key)?;

    tag(&auth_key, &wrapped.iv, &wrapped.encrypted_key)?
        .verify_slice(&wrapped.hmac)
        .map_err(|_| FsdumpError::Integrity)?;

    // Decrypt in place so the plaintext only ever lives inside the key.
    let mut plaintext = SecretKey::zeroed();
    plaintext
        .as_mut_bytes()
        .copy_from_slice(&wrapped.encrypted_key);
    cipher(&enc_key, &wrapped.iv)?.apply_keystream(plaintext.as_mut_bytes());

    Ok(plaintext)
}

/// Wrap a secret under `wrapping_key` (encrypt-then-MAC).
///
/// The inverse of [`unwrap`]; used to build fixtures and test vectors.
pub fn wrap(
    secret: &SecretKey,
    iv: &[u8; IV_LENGTH],
    wrapping_key: &SecretKey,
) -> Result<WrappedKeyData> {
    let (enc_key, auth_key) = stretch_key(wrapping_key)?;

    let mut ciphertext = secret.as_bytes().to_vec();
    cipher(&enc_key, iv)?.apply_keystream(&mut ciphertext);

    let hmac = tag(&auth_key, iv, &ciphertext)?.finalize().into_bytes().to_vec();

    Ok(WrappedKeyData {
        iv: iv.to_vec(),
        encrypted_key: ciphertext,
        hmac,
    })
}

/// Run the two-level unwrap chain for one protector.
///
/// `protector_key = unwrap(protector.wrapped_key, password_hash(password))`,
/// then `content_key = unwrap(wrapped_policy_key, protector_key)`.
/// Intermediate secrets are zeroized whether or not the chain succeeds.
pub fn unlock_content_key(
    password: &str,
    protector: &ProtectorData,
    wrapped_policy_key: &WrappedKeyData,
) -> Result<SecretKey> {
    let wrapping_key = password_hash(password, protector)?;
    let protector_key = unwrap(protector.wrapped_key()?, &wrapping_key)?;
    tracing::debug!(
        protector = %protector.protector_descriptor,
        "protector key unwrapped"
    );
    unwrap(wrapped_policy_key, &protector_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{HashingCosts, SourceType};

    const IV: [u8; IV_LENGTH] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
        0x0e, 0x0f,
    ];

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_bytes([byte; INTERNAL_KEY_LENGTH])
    }

    #[test]
    fn test_wrap_unwrap_recovers_secret() {
        let secret = key(0x42);
        let wrapping = key(0x07);

        let wrapped = wrap(&secret, &IV, &wrapping).unwrap();
        let recovered = unwrap(&wrapped, &wrapping).unwrap();

        assert_eq!(recovered.as_bytes(), secret.as_bytes());
        assert_ne!(wrapped.encrypted_key.as_slice(), secret.as_bytes());
    }

    #[test]
    fn test_iv_at_counter_boundary() {
        // Counter wraps across the full 128-bit block
        let iv = [0xff; IV_LENGTH];
        let secret = key(0x5a);
        let wrapping = key(0x01);

        let wrapped = wrap(&secret, &iv, &wrapping).unwrap();
        assert_eq!(unwrap(&wrapped, &wrapping).unwrap().as_bytes(), secret.as_bytes());
    }

    #[test]
    fn test_flipped_bits_fail_integrity() {
        let wrapping = key(0x07);
        let wrapped = wrap(&key(0x42), &IV, &wrapping).unwrap();

        for field in 0..3 {
            let len = match field {
                0 => wrapped.iv.len(),
                1 => wrapped.encrypted_key.len(),
                _ => wrapped.hmac.len(),
            };
            for byte in 0..len {
                for bit in 0..8 {
                    let mut tampered = wrapped.clone();
                    let target = match field {
                        0 => &mut tampered.iv,
                        1 => &mut tampered.encrypted_key,
                        _ => &mut tampered.hmac,
                    };
                    target[byte] ^= 1 << bit;
                    assert!(matches!(
                        unwrap(&tampered, &wrapping),
                        Err(FsdumpError::Integrity)
                    ));
                }
            }
        }
    }

    #[test]
    fn test_wrong_wrapping_key_fails_integrity() {
        let wrapped = wrap(&key(0x42), &IV, &key(0x07)).unwrap();
        assert!(matches!(
            unwrap(&wrapped, &key(0x08)),
            Err(FsdumpError::Integrity)
        ));
    }

    #[test]
    fn test_truncated_record_is_metadata_error() {
        let mut wrapped = wrap(&key(0x42), &IV, &key(0x07)).unwrap();
        wrapped.hmac.pop();
        assert!(matches!(
            unwrap(&wrapped, &key(0x07)),
            Err(FsdumpError::Metadata(_))
        ));
    }

    #[test]
    fn test_stretch_key_deterministic_and_distinct() {
        let (enc1, auth1) = stretch_key(&key(0x11)).unwrap();
        let (enc2, auth2) = stretch_key(&key(0x11)).unwrap();

        assert_eq!(enc1.as_bytes(), enc2.as_bytes());
        assert_eq!(auth1.as_bytes(), auth2.as_bytes());
        assert_ne!(enc1.as_bytes(), auth1.as_bytes());
    }

    #[test]
    fn test_stretch_key_matches_hkdf_sha256() {
        // RFC 5869 with zero-length salt and info equals HMAC with a zero salt
        let ikm = key(0x0b);
        let prk = <HmacSha256 as Mac>::new_from_slice(&[0u8; 32])
            .unwrap()
            .chain_update(ikm.as_bytes())
            .finalize()
            .into_bytes();
        let t1 = <HmacSha256 as Mac>::new_from_slice(&prk)
            .unwrap()
            .chain_update([0x01])
            .finalize()
            .into_bytes();
        let t2 = <HmacSha256 as Mac>::new_from_slice(&prk)
            .unwrap()
            .chain_update(t1)
            .chain_update([0x02])
            .finalize()
            .into_bytes();

        let (enc, auth) = stretch_key(&ikm).unwrap();
        assert_eq!(enc.as_bytes().as_slice(), t1.as_slice());
        assert_eq!(auth.as_bytes().as_slice(), t2.as_slice());
    }

    #[test]
    fn test_unlock_content_key_chain() {
        let mut protector = ProtectorData {
            protector_descriptor: "0123456789abcdef".to_string(),
            source: SourceType::CustomPassphrase as i32,
            costs: Some(HashingCosts {
                time: 1,
                memory: 64,
                parallelism: 1,
                truncation_fixed: true,
            }),
            salt: b"0123456789abcdef".to_vec(),
            ..Default::default()
        };
        let wrapping = password_hash("correct horse", &protector).unwrap();
        let protector_key = key(0x33);
        let content_key = key(0x99);
        protector.wrapped_key = Some(wrap(&protector_key, &IV, &wrapping).unwrap());
        let policy_key = wrap(&content_key, &[0x77; IV_LENGTH], &protector_key).unwrap();

        let recovered = unlock_content_key("correct horse", &protector, &policy_key).unwrap();
        assert_eq!(recovered.as_bytes(), content_key.as_bytes());

        assert!(matches!(
            unlock_content_key("wrong", &protector, &policy_key),
            Err(FsdumpError::Integrity)
        ));
    }
}
