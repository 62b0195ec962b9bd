//! CLI error types for structured error handling.
//!
//! This module provides typed errors that map to specific exit codes,
//! enabling consistent error handling across the CLI.

use std::fmt;

use fsdump_core::FsdumpError;

/// CLI-specific errors with associated exit codes.
#[derive(Debug)]
pub enum CliError {
    /// Resource not found (metadata directory, directory, policy, protector)
    NotFound { message: String, hint: String },

    /// No passphrase could be obtained
    AuthFailed {
        message: String,
        hint: Option<String>,
    },

    /// Invalid user input
    InvalidInput(String),

    /// Wrapped key failed verification
    IntegrityFailed { message: String, hint: String },

    /// Kernel rejected a key-management call
    Kernel(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::NotFound { message, hint } | CliError::IntegrityFailed { message, hint } => {
                write!(f, "{}\n{}", message, hint)
            }
            CliError::AuthFailed { message, hint } => {
                if let Some(h) = hint {
                    write!(f, "{}\n{}", message, h)
                } else {
                    write!(f, "{}", message)
                }
            }
            CliError::InvalidInput(message) | CliError::Kernel(message) => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Create a NotFound error with message and hint.
    pub fn not_found(message: impl Into<String>, hint: impl Into<String>) -> Self {
        CliError::NotFound {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Create an AuthFailed error with message and hint.
    pub fn auth_failed_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        CliError::AuthFailed {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        CliError::InvalidInput(message.into())
    }

    /// Map a core error onto a CLI error, if it has a dedicated exit code.
    ///
    /// I/O errors have none and fall through to the generic exit code.
    pub fn from_core(err: &FsdumpError) -> Option<Self> {
        let mapped = match err {
            FsdumpError::Integrity => CliError::IntegrityFailed {
                message: err.to_string(),
                hint: "Hint: Check the passphrase; if it is correct, the .fscrypt metadata is corrupted.".to_string(),
            },
            FsdumpError::KeyIdentifierMismatch { .. } | FsdumpError::Decode { .. } => {
                CliError::IntegrityFailed {
                    message: err.to_string(),
                    hint: "Hint: The .fscrypt metadata does not match this filesystem.".to_string(),
                }
            }
            FsdumpError::NotEncrypted(_) => CliError::not_found(
                err.to_string(),
                "Hint: Only directories with an fscrypt v2 policy can be dumped.",
            ),
            FsdumpError::MetadataNotFound(_) => CliError::not_found(
                err.to_string(),
                "Hint: Pass the mountpoint of the encrypted filesystem, not a subdirectory.",
            ),
            FsdumpError::Metadata(_) => CliError::IntegrityFailed {
                message: err.to_string(),
                hint: "Hint: The .fscrypt metadata is malformed; restore it from a backup.".to_string(),
            },
            FsdumpError::Prompt(_) => CliError::auth_failed_with_hint(
                err.to_string(),
                "Hint: Set FSDUMP_PASSPHRASE when running without a terminal.",
            ),
            FsdumpError::Configuration(_)
            | FsdumpError::InvalidSelection { .. }
            | FsdumpError::UnsupportedPolicy(_) => CliError::invalid_input(err.to_string()),
            FsdumpError::Ioctl { .. } => CliError::Kernel(err.to_string()),
            FsdumpError::Io { .. } => return None,
        };
        Some(mapped)
    }

    /// Get the exit code for this error.
    pub fn exit_code(&self) -> i32 {
        use super::constants::exit_codes;
        match self {
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::AuthFailed { .. } => exit_codes::AUTH_FAILED,
            CliError::InvalidInput(_) => exit_codes::INVALID_INPUT,
            CliError::IntegrityFailed { .. } => exit_codes::INTEGRITY_FAILED,
            CliError::Kernel(_) => exit_codes::KERNEL,
        }
    }

    /// Print error message to stderr and exit with appropriate code.
    ///
    /// Destructors of live values do not run; call this only once every
    /// unlocked directory has been released.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);
        std::process::exit(self.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::exit_codes;
    use std::path::PathBuf;

    #[test]
    fn test_core_errors_map_to_exit_codes() {
        let cases = [
            (FsdumpError::Integrity, exit_codes::INTEGRITY_FAILED),
            (
                FsdumpError::NotEncrypted(PathBuf::from("/mnt/plain")),
                exit_codes::NOT_FOUND,
            ),
            (
                FsdumpError::MetadataNotFound("Policy 00".to_string()),
                exit_codes::NOT_FOUND,
            ),
            (
                FsdumpError::Metadata("Protector record abcd is stored as 1234".to_string()),
                exit_codes::INTEGRITY_FAILED,
            ),
            (
                FsdumpError::InvalidSelection { index: 4, count: 3 },
                exit_codes::INVALID_INPUT,
            ),
            (FsdumpError::UnsupportedPolicy(0), exit_codes::INVALID_INPUT),
            (
                FsdumpError::Prompt("no tty".to_string()),
                exit_codes::AUTH_FAILED,
            ),
            (
                FsdumpError::Ioctl {
                    op: "FS_IOC_ADD_ENCRYPTION_KEY",
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                },
                exit_codes::KERNEL,
            ),
        ];
        for (err, code) in cases {
            let mapped = CliError::from_core(&err).unwrap();
            assert_eq!(mapped.exit_code(), code, "{}", err);
        }
    }

    #[test]
    fn test_malformed_metadata_does_not_suggest_mountpoint() {
        let text = CliError::from_core(&FsdumpError::Metadata("IV has 3 bytes".to_string()))
            .unwrap()
            .to_string();
        assert!(text.contains("malformed"));
        assert!(!text.contains("mountpoint"));
    }

    #[test]
    fn test_io_errors_have_no_dedicated_code() {
        let err = FsdumpError::from(std::io::Error::other("disk gone"));
        assert!(CliError::from_core(&err).is_none());
    }

    #[test]
    fn test_integrity_message_carries_hint() {
        let text = CliError::from_core(&FsdumpError::Integrity)
            .unwrap()
            .to_string();
        assert!(text.contains("Integrity check failed"));
        assert!(text.contains("passphrase"));
    }
}
