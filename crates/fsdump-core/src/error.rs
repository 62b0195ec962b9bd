//! Error types for fsdump core operations.
//!
//! This module defines the error hierarchy for all core operations.
//! Errors are descriptive at the core level; the CLI layer maps these
//! to user-friendly messages and exit codes.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for fsdump operations.
pub type Result<T> = std::result::Result<T, FsdumpError>;

/// Core error type for fsdump operations.
#[derive(Debug, Error)]
pub enum FsdumpError {
    /// Protector has no password-derived material, or its costs are unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HMAC verification failed on a wrapped key
    #[error("Integrity check failed: wrong password or corrupted metadata")]
    Integrity,

    /// Kernel call failed
    #[error("{op} failed: {source}")]
    Ioctl {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Path carries no encryption policy
    #[error("Not encrypted: {}", .0.display())]
    NotEncrypted(PathBuf),

    /// Protector selection outside the offered range
    #[error("Invalid selection {index}: expected a value between 1 and {count}")]
    InvalidSelection { index: usize, count: usize },

    /// Policy version this tool cannot unlock
    #[error("Unsupported policy version {0}: only v2 policies can be unlocked")]
    UnsupportedPolicy(u8),

    /// Kernel derived a different identifier than the policy names
    #[error("Key identifier mismatch: policy expects {expected}, kernel computed {actual}")]
    KeyIdentifierMismatch { expected: String, actual: String },

    /// Metadata directory or record missing
    #[error("Metadata not found: {0}")]
    MetadataNotFound(String),

    /// Metadata record malformed or inconsistent
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Protobuf decoding error
    #[error("Failed to decode metadata record: {source}")]
    Decode {
        #[from]
        source: prost::DecodeError,
    },

    /// Caller could not supply a password or selection
    #[error("Prompt failed: {0}")]
    Prompt(String),

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl FsdumpError {
    pub(crate) fn ioctl(op: &'static str, source: std::io::Error) -> Self {
        FsdumpError::Ioctl { op, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_selection_message() {
        let err = FsdumpError::InvalidSelection { index: 4, count: 3 };
        assert!(err.to_string().contains("between 1 and 3"));
    }

    #[test]
    fn test_integrity_message_mentions_password() {
        assert!(FsdumpError::Integrity.to_string().contains("wrong password"));
    }
}
