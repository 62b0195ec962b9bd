//! fscrypt metadata records.
//!
//! Policies and protectors are stored by the fscrypt userspace tool as
//! protobuf messages under `<mountpoint>/.fscrypt/`. This module models
//! the record contents and checks their structural invariants; discovery
//! of the record files lives in [`store`].

pub mod store;

use std::fmt;

use crate::error::{FsdumpError, Result};

pub use store::{FsMetadataStore, MetadataStore};

/// Length of every key secret in the unwrap chain.
pub const INTERNAL_KEY_LENGTH: usize = 32;

/// Length of the AES-CTR initialization vector.
pub const IV_LENGTH: usize = 16;

/// Length of the HMAC-SHA256 tag.
pub const HMAC_LENGTH: usize = 32;

/// Length of a v2 policy key identifier.
pub const KEY_IDENTIFIER_LENGTH: usize = 16;

/// Length of a protector descriptor in bytes (16 hex characters).
pub const PROTECTOR_DESCRIPTOR_LENGTH: usize = 8;

/// Ciphertext plus integrity tag wrapping a 32-byte secret.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WrappedKeyData {
    #[prost(bytes = "vec", tag = "1")]
    pub iv: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub encrypted_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub hmac: Vec<u8>,
}

/// Origin of a protector's wrapping key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SourceType {
    Default = 0,
    PamPassphrase = 1,
    CustomPassphrase = 2,
    RawKey = 3,
}

impl SourceType {
    /// Whether the wrapping key is derived by hashing a password.
    pub fn is_password_derived(self) -> bool {
        matches!(self, SourceType::PamPassphrase | SourceType::CustomPassphrase)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::Default => "default",
            SourceType::PamPassphrase => "pam_passphrase",
            SourceType::CustomPassphrase => "custom_passphrase",
            SourceType::RawKey => "raw_key",
        };
        f.write_str(name)
    }
}

/// Argon2id tuning stored alongside a password protector.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct HashingCosts {
    #[prost(int64, tag = "2")]
    pub time: i64,
    /// Memory cost in KiB
    #[prost(int64, tag = "3")]
    pub memory: i64,
    #[prost(int64, tag = "4")]
    pub parallelism: i64,
    /// Older fscrypt releases truncated parallelism to a byte.
    #[prost(bool, tag = "5")]
    pub truncation_fixed: bool,
}

/// A protector: one independent unlock path for policies.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtectorData {
    #[prost(string, tag = "1")]
    pub protector_descriptor: String,
    #[prost(enumeration = "SourceType", tag = "2")]
    pub source: i32,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(message, optional, tag = "4")]
    pub costs: Option<HashingCosts>,
    #[prost(bytes = "vec", tag = "5")]
    pub salt: Vec<u8>,
    #[prost(int32, tag = "6")]
    pub uid: i32,
    #[prost(message, optional, tag = "7")]
    pub wrapped_key: Option<WrappedKeyData>,
}

/// Encryption modes a policy may name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum EncryptionMode {
    Default = 0,
    Aes256Xts = 1,
    Aes256Gcm = 2,
    Aes256Cbc = 3,
    Aes256Cts = 4,
    Aes128Cbc = 5,
    Aes128Cts = 6,
    Adiantum = 9,
    Aes256Hctr2 = 10,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct EncryptionOptions {
    #[prost(int64, tag = "1")]
    pub padding: i64,
    #[prost(enumeration = "EncryptionMode", tag = "2")]
    pub contents: i32,
    #[prost(enumeration = "EncryptionMode", tag = "3")]
    pub filenames: i32,
    #[prost(int64, tag = "4")]
    pub policy_version: i64,
}

/// The content key wrapped under one protector's secret.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WrappedPolicyKey {
    #[prost(string, tag = "1")]
    pub protector_descriptor: String,
    #[prost(message, optional, tag = "2")]
    pub wrapped_policy_key: Option<WrappedKeyData>,
}

/// A policy: the shared content key and every protector able to unwrap it.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PolicyData {
    #[prost(string, tag = "1")]
    pub key_descriptor: String,
    #[prost(message, optional, tag = "2")]
    pub options: Option<EncryptionOptions>,
    #[prost(message, repeated, tag = "3")]
    pub wrapped_policy_keys: Vec<WrappedPolicyKey>,
}

/// Identifier the kernel uses to name a v2 content key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyIdentifier(pub [u8; KEY_IDENTIFIER_LENGTH]);

impl KeyIdentifier {
    /// Parse the hex form stored in `PolicyData::key_descriptor`.
    pub fn from_hex(value: &str) -> Result<Self> {
        let mut bytes = [0u8; KEY_IDENTIFIER_LENGTH];
        hex::decode_to_slice(value, &mut bytes).map_err(|e| {
            FsdumpError::Metadata(format!("Invalid key descriptor {:?}: {}", value, e))
        })?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_IDENTIFIER_LENGTH] {
        &self.0
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyIdentifier({})", self.to_hex())
    }
}

/// Check that a descriptor is lowercase or uppercase hex of the given byte length.
pub(crate) fn validate_descriptor(kind: &str, value: &str, byte_len: usize) -> Result<()> {
    if value.len() != byte_len * 2 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(FsdumpError::Metadata(format!(
            "Invalid {} descriptor {:?}: expected {} hex characters",
            kind,
            value,
            byte_len * 2
        )));
    }
    Ok(())
}

impl WrappedKeyData {
    /// Check field lengths before any cryptographic use.
    pub fn validate(&self) -> Result<()> {
        if self.iv.len() != IV_LENGTH {
            return Err(FsdumpError::Metadata(format!(
                "Wrapped key IV must be {} bytes (got {})",
                IV_LENGTH,
                self.iv.len()
            )));
        }
        if self.encrypted_key.len() != INTERNAL_KEY_LENGTH {
            return Err(FsdumpError::Metadata(format!(
                "Wrapped key ciphertext must be {} bytes (got {})",
                INTERNAL_KEY_LENGTH,
                self.encrypted_key.len()
            )));
        }
        if self.hmac.len() != HMAC_LENGTH {
            return Err(FsdumpError::Metadata(format!(
                "Wrapped key HMAC must be {} bytes (got {})",
                HMAC_LENGTH,
                self.hmac.len()
            )));
        }
        Ok(())
    }
}

impl ProtectorData {
    /// Check the record's structure and the salt/source pairing.
    ///
    /// A salt must be present exactly when the source is password-derived;
    /// a mismatch is a configuration error rather than a decoding one.
    pub fn validate(&self) -> Result<()> {
        validate_descriptor(
            "protector",
            &self.protector_descriptor,
            PROTECTOR_DESCRIPTOR_LENGTH,
        )?;

        let password_derived = self.source().is_password_derived();
        if password_derived && self.salt.is_empty() {
            return Err(FsdumpError::Configuration(format!(
                "Protector {} is {} but has no salt",
                self.protector_descriptor,
                self.source()
            )));
        }
        if !password_derived && !self.salt.is_empty() {
            return Err(FsdumpError::Configuration(format!(
                "Protector {} is {} but carries a salt",
                self.protector_descriptor,
                self.source()
            )));
        }

        self.wrapped_key()?.validate()
    }

    /// The wrapped protector key, required on every protector.
    pub fn wrapped_key(&self) -> Result<&WrappedKeyData> {
        self.wrapped_key.as_ref().ok_or_else(|| {
            FsdumpError::Metadata(format!(
                "Protector {} has no wrapped key",
                self.protector_descriptor
            ))
        })
    }
}

impl WrappedPolicyKey {
    pub fn wrapped_key(&self) -> Result<&WrappedKeyData> {
        self.wrapped_policy_key.as_ref().ok_or_else(|| {
            FsdumpError::Metadata(format!(
                "Policy entry for protector {} has no wrapped key",
                self.protector_descriptor
            ))
        })
    }
}

impl PolicyData {
    /// Check the record's structure.
    pub fn validate(&self) -> Result<()> {
        self.key_identifier()?;
        if self.wrapped_policy_keys.is_empty() {
            return Err(FsdumpError::Metadata(format!(
                "Policy {} has no protectors",
                self.key_descriptor
            )));
        }
        for entry in &self.wrapped_policy_keys {
            validate_descriptor(
                "protector",
                &entry.protector_descriptor,
                PROTECTOR_DESCRIPTOR_LENGTH,
            )?;
            entry.wrapped_key()?.validate()?;
        }
        Ok(())
    }

    pub fn key_identifier(&self) -> Result<KeyIdentifier> {
        KeyIdentifier::from_hex(&self.key_descriptor)
    }
}
