//! Key material and password hashing using Argon2id.
//!
//! Password protectors derive their wrapping key from the user's password
//! with the memory-hard Argon2id function, using the salt and costs stored
//! in the protector record.

use argon2::Argon2;
use zeroize::ZeroizeOnDrop;

use crate::error::{FsdumpError, Result};
use crate::metadata::{HashingCosts, ProtectorData, INTERNAL_KEY_LENGTH};

/// A 32-byte secret in the unwrap chain.
///
/// This type ensures that key material is securely zeroized from memory
/// when dropped, reducing the window of exposure.
#[derive(ZeroizeOnDrop)]
pub struct SecretKey {
    key: [u8; INTERNAL_KEY_LENGTH],
}

impl SecretKey {
    /// Wrap raw bytes as a secret.
    ///
    /// # Security
    ///
    /// The caller is responsible for zeroizing its own copy of `bytes`.
    pub fn from_bytes(bytes: [u8; INTERNAL_KEY_LENGTH]) -> Self {
        Self { key: bytes }
    }

    /// An all-zero key to be filled in place.
    pub(crate) fn zeroed() -> Self {
        Self {
            key: [0u8; INTERNAL_KEY_LENGTH],
        }
    }

    /// Mutable access for writing derived material directly into the key.
    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; INTERNAL_KEY_LENGTH] {
        &mut self.key
    }

    /// Get a reference to the raw key bytes.
    ///
    /// # Security
    ///
    /// Avoid storing or logging this value. Use only for immediate key operations.
    pub fn as_bytes(&self) -> &[u8; INTERNAL_KEY_LENGTH] {
        &self.key
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Argon2 parameters resolved from a protector's stored costs.
fn argon2_params(costs: &HashingCosts) -> Result<argon2::Params> {
    let narrow = |name: &str, value: i64| {
        u32::try_from(value).map_err(|_| {
            FsdumpError::Configuration(format!("Hashing cost {} out of range: {}", name, value))
        })
    };

    let time = narrow("time", costs.time)?;
    let memory = narrow("memory", costs.memory)?;
    let mut parallelism = narrow("parallelism", costs.parallelism)?;
    if !costs.truncation_fixed {
        // Protectors written before the fix stored the byte-truncated value.
        parallelism &= 0xff;
    }

    argon2::Params::new(memory, time, parallelism, Some(INTERNAL_KEY_LENGTH))
        .map_err(|e| FsdumpError::Configuration(format!("Invalid hashing costs: {}", e)))
}

/// Derive a protector's wrapping key from a password using Argon2id.
///
/// # Arguments
///
/// * `password` - The password entered for this protector
/// * `protector` - The protector record holding salt and costs
///
/// # Errors
///
/// Returns `FsdumpError::Configuration` if the protector has no salt
/// (it is not password-derived) or its costs are unusable.
///
/// # Security
///
/// - Same password + protector always produces the same key (deterministic)
/// - The result is zeroized on drop
pub fn password_hash(password: &str, protector: &ProtectorData) -> Result<SecretKey> {
    if protector.salt.is_empty() {
        return Err(FsdumpError::Configuration(format!(
            "Protector {} does not use a hashed password",
            protector.protector_descriptor
        )));
    }

    let costs = protector.costs.as_ref().ok_or_else(|| {
        FsdumpError::Configuration(format!(
            "Protector {} has no hashing costs",
            protector.protector_descriptor
        ))
    })?;
    let params = argon2_params(costs)?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = SecretKey::zeroed();
    argon2
        .hash_password_into(password.as_bytes(), &protector.salt, key.as_mut_bytes())
        .map_err(|e| FsdumpError::Configuration(format!("Password hashing failed: {}", e)))?;

    Ok(key)
}
