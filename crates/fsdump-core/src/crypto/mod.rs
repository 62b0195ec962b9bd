//! Key unwrapping for fscrypt protectors and policies.
//!
//! This module recovers a directory's content key using well-audited
//! RustCrypto primitives:
//! - **Argon2id**: memory-hard password hashing for password protectors
//! - **HKDF-SHA256**: stretching a wrapping key into encryption and MAC keys
//! - **HMAC-SHA256** then **AES-256-CTR**: verify-then-decrypt of wrapped keys
//!
//! ## Security Model
//!
//! - The HMAC is verified in constant time before any decryption
//! - Every secret lives in a [`SecretKey`], zeroized on drop
//! - No partial plaintext is returned on any error path

pub mod key;
pub mod wrap;

pub use key::{password_hash, SecretKey};
pub use wrap::{stretch_key, unlock_content_key, unwrap, wrap};
