//! # fsdump Core
//!
//! Core library for fsdump - unlocks fscrypt v2 encrypted directories from
//! their on-disk metadata so their contents can be copied out.
//!
//! This crate holds the unlock logic independent of the CLI interface.
//!
//! ## Architecture
//!
//! - **metadata**: Protobuf policy and protector records under `.fscrypt/`
//! - **crypto**: Argon2id password hashing and HMAC-verified key unwrapping
//! - **kernel**: fscrypt policy and key-management ioctls
//! - **resolver**: The per-directory Locked → Unlocked → Locked cycle

pub mod crypto;
pub mod error;
pub mod kernel;
pub mod metadata;
pub mod resolver;

pub use crypto::SecretKey;
pub use error::{FsdumpError, Result};
pub use kernel::{AddKeyStatus, FscryptKeyring, Keyring, RemovalStatus};
pub use metadata::{FsMetadataStore, KeyIdentifier, MetadataStore, SourceType};
pub use resolver::{PolicyResolver, ProtectorChoice, Prompter, UnlockedDirectory};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
