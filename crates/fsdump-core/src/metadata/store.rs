//! Metadata record discovery.
//!
//! The `MetadataStore` trait abstracts where policy and protector records
//! come from, so the unlock cycle can be driven from fixtures in tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use prost::Message;

use super::{
    validate_descriptor, PolicyData, ProtectorData, KEY_IDENTIFIER_LENGTH,
    PROTECTOR_DESCRIPTOR_LENGTH,
};
use crate::error::{FsdumpError, Result};

/// Name of the metadata directory at the root of an fscrypt filesystem.
pub const METADATA_DIR: &str = ".fscrypt";

/// Source of policy and protector records.
pub trait MetadataStore {
    /// Load and validate the policy with the given hex descriptor.
    fn policy(&self, descriptor: &str) -> Result<PolicyData>;

    /// Load and validate the protector with the given hex descriptor.
    fn protector(&self, descriptor: &str) -> Result<ProtectorData>;
}

/// Records stored as files under `<mountpoint>/.fscrypt`.
///
/// Login protectors are kept on the root filesystem, so protector lookups
/// fall back to `<fallback_root>/.fscrypt/protectors` when the mountpoint
/// does not have the record.
#[derive(Debug, Clone)]
pub struct FsMetadataStore {
    base: PathBuf,
    fallback: Option<PathBuf>,
}

impl FsMetadataStore {
    /// Open the metadata directory of a mounted filesystem.
    ///
    /// # Errors
    ///
    /// Returns `FsdumpError::MetadataNotFound` if `<mountpoint>/.fscrypt` is not a directory.
    pub fn open(mountpoint: &Path) -> Result<Self> {
        let base = mountpoint.join(METADATA_DIR);
        if !base.is_dir() {
            return Err(FsdumpError::MetadataNotFound(format!(
                "Mountpoint {} does not have a {} directory",
                mountpoint.display(),
                METADATA_DIR
            )));
        }
        Ok(Self {
            base,
            fallback: None,
        })
    }

    /// Look up protectors missing from the mountpoint under another root.
    pub fn with_fallback_root(mut self, root: &Path) -> Self {
        let fallback = root.join(METADATA_DIR);
        if fallback != self.base {
            self.fallback = Some(fallback);
        }
        self
    }

    fn read_record(dir: &Path, kind: &str, descriptor: &str) -> Result<Option<Vec<u8>>> {
        let path = dir.join(kind).join(descriptor);
        match fs::read(&path) {
            Ok(bytes) => {
                tracing::debug!(path = %path.display(), "read metadata record");
                Ok(Some(bytes))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl MetadataStore for FsMetadataStore {
    fn policy(&self, descriptor: &str) -> Result<PolicyData> {
        validate_descriptor("policy", descriptor, KEY_IDENTIFIER_LENGTH)?;
        let bytes = Self::read_record(&self.base, "policies", descriptor)?.ok_or_else(|| {
            FsdumpError::MetadataNotFound(format!("Policy {}", descriptor))
        })?;
        let policy = PolicyData::decode(bytes.as_slice())?;
        policy.validate()?;
        Ok(policy)
    }

    fn protector(&self, descriptor: &str) -> Result<ProtectorData> {
        validate_descriptor("protector", descriptor, PROTECTOR_DESCRIPTOR_LENGTH)?;
        let mut bytes = Self::read_record(&self.base, "protectors", descriptor)?;
        if bytes.is_none() {
            if let Some(fallback) = &self.fallback {
                tracing::debug!(descriptor, "protector not on mountpoint, trying fallback root");
                bytes = Self::read_record(fallback, "protectors", descriptor)?;
            }
        }
        let bytes = bytes.ok_or_else(|| {
            FsdumpError::MetadataNotFound(format!("Protector {}", descriptor))
        })?;
        let protector = ProtectorData::decode(bytes.as_slice())?;
        protector.validate()?;
        Ok(protector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{HashingCosts, SourceType, WrappedKeyData, WrappedPolicyKey};
    use tempfile::tempdir;

    const POLICY: &str = "00112233445566778899aabbccddeeff";
    const PROTECTOR: &str = "0123456789abcdef";

    fn wrapped() -> WrappedKeyData {
        WrappedKeyData {
            iv: vec![0; 16],
            encrypted_key: vec![0; 32],
            hmac: vec![0; 32],
        }
    }

    fn protector_record() -> ProtectorData {
        ProtectorData {
            protector_descriptor: PROTECTOR.to_string(),
            source: SourceType::CustomPassphrase as i32,
            name: "backup".to_string(),
            costs: Some(HashingCosts {
                time: 1,
                memory: 8,
                parallelism: 1,
                truncation_fixed: true,
            }),
            salt: vec![7; 16],
            uid: -1,
            wrapped_key: Some(wrapped()),
        }
    }

    fn write_record(root: &Path, kind: &str, name: &str, bytes: &[u8]) {
        let dir = root.join(METADATA_DIR).join(kind);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), bytes).unwrap();
    }

    #[test]
    fn test_open_requires_metadata_dir() {
        let dir = tempdir().unwrap();
        let err = FsMetadataStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, FsdumpError::MetadataNotFound(_)));
        assert!(err.to_string().contains(".fscrypt"));
    }

    #[test]
    fn test_reads_policy_record() {
        let dir = tempdir().unwrap();
        let policy = PolicyData {
            key_descriptor: POLICY.to_string(),
            options: None,
            wrapped_policy_keys: vec![WrappedPolicyKey {
                protector_descriptor: PROTECTOR.to_string(),
                wrapped_policy_key: Some(wrapped()),
            }],
        };
        write_record(dir.path(), "policies", POLICY, &policy.encode_to_vec());

        let store = FsMetadataStore::open(dir.path()).unwrap();
        assert_eq!(store.policy(POLICY).unwrap(), policy);
    }

    #[test]
    fn test_protector_falls_back_to_root() {
        let mount = tempdir().unwrap();
        let root = tempdir().unwrap();
        fs::create_dir_all(mount.path().join(METADATA_DIR)).unwrap();
        write_record(
            root.path(),
            "protectors",
            PROTECTOR,
            &protector_record().encode_to_vec(),
        );

        let without = FsMetadataStore::open(mount.path()).unwrap();
        assert!(matches!(
            without.protector(PROTECTOR),
            Err(FsdumpError::MetadataNotFound(_))
        ));

        let with = without.with_fallback_root(root.path());
        assert_eq!(with.protector(PROTECTOR).unwrap(), protector_record());
    }

    #[test]
    fn test_rejects_non_hex_descriptor() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(METADATA_DIR)).unwrap();
        let store = FsMetadataStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.protector("../policies"),
            Err(FsdumpError::Metadata(_))
        ));
    }

    #[test]
    fn test_garbage_record_fails_to_decode() {
        let dir = tempdir().unwrap();
        write_record(dir.path(), "policies", POLICY, &[0xff, 0xff, 0xff]);
        let store = FsMetadataStore::open(dir.path()).unwrap();
        assert!(matches!(store.policy(POLICY), Err(FsdumpError::Decode { .. })));
    }
}
