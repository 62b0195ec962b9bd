//! Kernel key-management interface.
//!
//! The `Keyring` trait is the seam between the unlock cycle and the
//! kernel. `FscryptKeyring` implements it with the fscrypt v2 ioctls;
//! tests substitute an in-memory keyring.

pub mod abi;
pub mod ioctl;

use std::path::Path;

use crate::crypto::SecretKey;
use crate::error::{FsdumpError, Result};
use crate::metadata::KeyIdentifier;

use abi::{
    AddKeyArg, EncryptionPolicy, GetKeyStatusArg, GetPolicyExArg, KeySpecifier, RemoveKeyArg,
    FSCRYPT_KEY_REMOVAL_STATUS_FLAG_FILES_BUSY, FSCRYPT_KEY_REMOVAL_STATUS_FLAG_OTHER_USERS,
    KEY_SPECIFIER_SIZE, REMOVE_KEY_ARG_SIZE,
};
use ioctl::{
    errno, ioctl_rw, FS_IOC_ADD_ENCRYPTION_KEY, FS_IOC_GET_ENCRYPTION_KEY_STATUS,
    FS_IOC_GET_ENCRYPTION_POLICY_EX, FS_IOC_REMOVE_ENCRYPTION_KEY,
};

const GET_POLICY_OP: &str = "FS_IOC_GET_ENCRYPTION_POLICY_EX";
const ADD_KEY_OP: &str = "FS_IOC_ADD_ENCRYPTION_KEY";
const REMOVE_KEY_OP: &str = "FS_IOC_REMOVE_ENCRYPTION_KEY";
const KEY_STATUS_OP: &str = "FS_IOC_GET_ENCRYPTION_KEY_STATUS";

/// Whether `add_key` registered a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddKeyStatus {
    Added,
    AlreadyPresent,
}

/// Result of a successful `add_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddKeyOutcome {
    /// Identifier the kernel registered the key under.
    pub identifier: KeyIdentifier,
    pub status: AddKeyStatus,
}

/// What `remove_key` achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalStatus {
    /// Key removed and all its files locked.
    Removed,
    /// Key removed but some files are still in use and stay readable.
    FilesBusy,
    /// Only this user's claim was dropped; other users still hold the key.
    OtherUsers,
}

impl RemovalStatus {
    pub fn from_flags(flags: u32) -> Self {
        if flags & FSCRYPT_KEY_REMOVAL_STATUS_FLAG_FILES_BUSY != 0 {
            RemovalStatus::FilesBusy
        } else if flags & FSCRYPT_KEY_REMOVAL_STATUS_FLAG_OTHER_USERS != 0 {
            RemovalStatus::OtherUsers
        } else {
            RemovalStatus::Removed
        }
    }
}

/// Map a failed policy lookup on `path` to the error callers see.
///
/// ENODATA means the directory has no policy. Kernels before 5.4 report
/// the same condition as ENOENT. Every other failure is passed through.
pub fn classify_policy_error(path: &Path, err: FsdumpError) -> FsdumpError {
    match errno(&err) {
        Some(libc::ENODATA) | Some(libc::ENOENT) => FsdumpError::NotEncrypted(path.to_path_buf()),
        _ => err,
    }
}

/// Map the result of an add-key call to its status.
pub fn classify_add_result(result: Result<()>) -> Result<AddKeyStatus> {
    match result {
        Ok(()) => Ok(AddKeyStatus::Added),
        Err(err) if errno(&err) == Some(libc::EEXIST) => Ok(AddKeyStatus::AlreadyPresent),
        Err(err) => Err(err),
    }
}

/// Kernel key-management operations used by the unlock cycle.
pub trait Keyring {
    /// Read the v2 policy identifier of an encrypted directory.
    ///
    /// # Errors
    ///
    /// - `FsdumpError::NotEncrypted` if the path has no policy
    /// - `FsdumpError::UnsupportedPolicy` for v1 policies
    /// - `FsdumpError::Ioctl` for any other kernel failure
    fn policy_identifier(&self, path: &Path) -> Result<KeyIdentifier>;

    /// Register a content key with the filesystem at `fs_root`.
    ///
    /// Registering a key that is already present is not an error.
    fn add_key(
        &self,
        content_key: &SecretKey,
        identifier: &KeyIdentifier,
        fs_root: &Path,
    ) -> Result<AddKeyOutcome>;

    /// Remove a content key from the filesystem at `fs_root`.
    fn remove_key(&self, identifier: &KeyIdentifier, fs_root: &Path) -> Result<RemovalStatus>;
}

/// `Keyring` backed by the fscrypt v2 ioctls.
#[derive(Debug, Default, Clone, Copy)]
pub struct FscryptKeyring;

impl FscryptKeyring {
    pub fn new() -> Self {
        Self
    }

    /// Whether the calling user already holds a claim on `identifier`.
    ///
    /// Re-adding a v2 key this user already added succeeds without error,
    /// so the status has to be read before the add. A kernel that cannot
    /// answer is treated as "not held".
    fn caller_holds_key(&self, identifier: &KeyIdentifier, fs_root: &Path) -> bool {
        let mut arg = GetKeyStatusArg::new(KeySpecifier::by_identifier(*identifier)).encode();
        let reply = ioctl_rw(fs_root, KEY_STATUS_OP, FS_IOC_GET_ENCRYPTION_KEY_STATUS, &mut arg)
            .and_then(|()| {
                GetKeyStatusArg::decode(&arg).map_err(|e| FsdumpError::ioctl(KEY_STATUS_OP, e))
            });
        match reply {
            Ok(status) => status.held_by_caller(),
            Err(err) => {
                tracing::debug!(identifier = %identifier, error = %err, "key status unavailable");
                false
            }
        }
    }
}

impl Keyring for FscryptKeyring {
    fn policy_identifier(&self, path: &Path) -> Result<KeyIdentifier> {
        let mut arg = GetPolicyExArg::request();
        ioctl_rw(path, GET_POLICY_OP, FS_IOC_GET_ENCRYPTION_POLICY_EX, &mut arg)
            .map_err(|err| classify_policy_error(path, err))?;

        match GetPolicyExArg::decode(&arg).map_err(|e| FsdumpError::ioctl(GET_POLICY_OP, e))? {
            EncryptionPolicy::V2(policy) => {
                tracing::debug!(
                    path = %path.display(),
                    identifier = %policy.identifier,
                    contents_mode = policy.contents_mode,
                    filenames_mode = policy.filenames_mode,
                    "read v2 policy"
                );
                Ok(policy.identifier)
            }
            EncryptionPolicy::V1 { .. } => {
                Err(FsdumpError::UnsupportedPolicy(abi::FSCRYPT_POLICY_V1))
            }
        }
    }

    fn add_key(
        &self,
        content_key: &SecretKey,
        identifier: &KeyIdentifier,
        fs_root: &Path,
    ) -> Result<AddKeyOutcome> {
        let held = self.caller_holds_key(identifier, fs_root);
        let spec = KeySpecifier::by_identifier(*identifier);
        let mut arg = AddKeyArg::new(spec, content_key.as_bytes()).encode();

        let added = classify_add_result(ioctl_rw(
            fs_root,
            ADD_KEY_OP,
            FS_IOC_ADD_ENCRYPTION_KEY,
            &mut arg,
        ))?;

        // The kernel writes back the identifier it derived from the secret.
        let registered = match added {
            AddKeyStatus::Added => KeySpecifier::decode(&arg[..KEY_SPECIFIER_SIZE])
                .map_err(|e| FsdumpError::ioctl(ADD_KEY_OP, e))?
                .identifier,
            AddKeyStatus::AlreadyPresent => *identifier,
        };

        if registered != *identifier {
            if let Err(err) = self.remove_key(&registered, fs_root) {
                tracing::warn!(identifier = %registered, error = %err, "failed to remove mismatched key");
            }
            return Err(FsdumpError::KeyIdentifierMismatch {
                expected: identifier.to_hex(),
                actual: registered.to_hex(),
            });
        }

        let status = if held {
            AddKeyStatus::AlreadyPresent
        } else {
            added
        };
        Ok(AddKeyOutcome {
            identifier: registered,
            status,
        })
    }

    fn remove_key(&self, identifier: &KeyIdentifier, fs_root: &Path) -> Result<RemovalStatus> {
        let mut arg: [u8; REMOVE_KEY_ARG_SIZE] =
            RemoveKeyArg::new(KeySpecifier::by_identifier(*identifier)).encode();
        ioctl_rw(fs_root, REMOVE_KEY_OP, FS_IOC_REMOVE_ENCRYPTION_KEY, &mut arg)?;

        let reply = RemoveKeyArg::decode(&arg).map_err(|e| FsdumpError::ioctl(REMOVE_KEY_OP, e))?;
        Ok(RemovalStatus::from_flags(reply.removal_status_flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_status_from_flags() {
        assert_eq!(RemovalStatus::from_flags(0), RemovalStatus::Removed);
        assert_eq!(
            RemovalStatus::from_flags(FSCRYPT_KEY_REMOVAL_STATUS_FLAG_FILES_BUSY),
            RemovalStatus::FilesBusy
        );
        assert_eq!(
            RemovalStatus::from_flags(FSCRYPT_KEY_REMOVAL_STATUS_FLAG_OTHER_USERS),
            RemovalStatus::OtherUsers
        );
        assert_eq!(
            RemovalStatus::from_flags(
                FSCRYPT_KEY_REMOVAL_STATUS_FLAG_FILES_BUSY
                    | FSCRYPT_KEY_REMOVAL_STATUS_FLAG_OTHER_USERS
            ),
            RemovalStatus::FilesBusy
        );
    }

    fn kernel_error(op: &'static str, code: i32) -> FsdumpError {
        FsdumpError::Ioctl {
            op,
            source: std::io::Error::from_raw_os_error(code),
        }
    }

    #[test]
    fn test_missing_policy_errnos_mean_not_encrypted() {
        let path = Path::new("/mnt/plain");
        for code in [libc::ENODATA, libc::ENOENT] {
            let err = classify_policy_error(path, kernel_error(GET_POLICY_OP, code));
            assert!(
                matches!(&err, FsdumpError::NotEncrypted(p) if p == path),
                "errno {} gave {:?}",
                code,
                err
            );
        }
    }

    #[test]
    fn test_other_policy_errnos_stay_kernel_errors() {
        let path = Path::new("/mnt/plain");
        for code in [libc::ENOTTY, libc::EOPNOTSUPP, libc::EPERM] {
            let err = classify_policy_error(path, kernel_error(GET_POLICY_OP, code));
            assert_eq!(errno(&err), Some(code));
        }

        let io = FsdumpError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(matches!(
            classify_policy_error(path, io),
            FsdumpError::Io { .. }
        ));
    }

    #[test]
    fn test_add_result_classification() {
        assert_eq!(classify_add_result(Ok(())).unwrap(), AddKeyStatus::Added);
        assert_eq!(
            classify_add_result(Err(kernel_error(ADD_KEY_OP, libc::EEXIST))).unwrap(),
            AddKeyStatus::AlreadyPresent
        );

        let err = classify_add_result(Err(kernel_error(ADD_KEY_OP, libc::EPERM))).unwrap_err();
        assert_eq!(errno(&err), Some(libc::EPERM));
        let err = classify_add_result(Err(kernel_error(ADD_KEY_OP, libc::ENOTTY))).unwrap_err();
        assert!(matches!(err, FsdumpError::Ioctl { op: ADD_KEY_OP, .. }));
    }

    #[test]
    fn test_key_status_on_unsupported_filesystem_is_not_held() {
        let dir = tempfile::tempdir().unwrap();
        let identifier = KeyIdentifier([0x33; 16]);
        assert!(!FscryptKeyring::new().caller_holds_key(&identifier, dir.path()));
        assert!(!FscryptKeyring::new().caller_holds_key(&identifier, Path::new("/nonexistent/fsdump")));
    }

    #[test]
    fn test_policy_identifier_missing_path() {
        let result = FscryptKeyring::new().policy_identifier(Path::new("/nonexistent/fsdump"));
        assert!(matches!(result, Err(FsdumpError::Io { .. })));
    }

    #[test]
    fn test_policy_identifier_plain_directory() {
        // tmpfs and unencrypted ext4 answer ENODATA or ENOTTY/EOPNOTSUPP;
        // none of them may yield an identifier.
        let dir = tempfile::tempdir().unwrap();
        let result = FscryptKeyring::new().policy_identifier(dir.path());
        assert!(matches!(
            result,
            Err(FsdumpError::NotEncrypted(_)) | Err(FsdumpError::Ioctl { .. })
        ));
    }
}
