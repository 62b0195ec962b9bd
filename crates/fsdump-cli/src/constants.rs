//! Constants used throughout the CLI.

/// Exit codes for the CLI.
///
/// These follow common Unix conventions:
/// - 0: Success
/// - 1: General error (used by anyhow for unhandled errors)
/// - 2: Misuse of shell command (reserved by shells, also clap usage errors)
/// - 3+: Application-specific errors
pub mod exit_codes {
    /// Resource not found (mountpoint metadata, directory, policy, protector).
    pub const NOT_FOUND: i32 = 3;

    /// Invalid user input or arguments.
    pub const INVALID_INPUT: i32 = 4;

    /// Authentication failed (no passphrase available).
    pub const AUTH_FAILED: i32 = 5;

    /// Integrity check failed (wrong passphrase or corrupted metadata).
    pub const INTEGRITY_FAILED: i32 = 6;

    /// The kernel refused a key-management call.
    pub const KERNEL: i32 = 7;

    /// Stopped by SIGINT, SIGTERM or SIGHUP (128 + SIGINT).
    pub const INTERRUPTED: i32 = 130;
}

/// Environment variables read by the CLI.
pub mod env_vars {
    pub const PASSPHRASE: &str = "FSDUMP_PASSPHRASE";
    pub const PROTECTOR_INDEX: &str = "FSDUMP_PROTECTOR_INDEX";
    pub const CONFIG: &str = "FSDUMP_CONFIG";
}
