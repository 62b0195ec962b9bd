//! Binary layouts of the fscrypt key-management ioctl arguments.
//!
//! Every struct the kernel exchanges with us is packed and unpacked here
//! and nowhere else. Layouts follow `include/uapi/linux/fscrypt.h`:
//! fields in declaration order, fixed-width integers in native byte
//! order, reserved fields zero-filled, no implicit padding.
//!
//! ```text
//! fscrypt_key_specifier (40)      type:u32 | __reserved:u32 | u:[u8; 32]
//! fscrypt_add_key_arg   (80 + n)  key_spec:40 | raw_size:u32 | key_id:u32 | __reserved:[u32; 8] | raw:[u8; n]
//! fscrypt_remove_key_arg (64)     key_spec:40 | removal_status_flags:u32 | __reserved:[u32; 5]
//! fscrypt_get_key_status_arg (128) key_spec:40 | __reserved:[u32; 6] | status:u32 | status_flags:u32 |
//!                                 user_count:u32 | __out_reserved:[u32; 13]
//! fscrypt_get_policy_ex_arg (32)  policy_size:u64 | policy:[u8; 24]
//! fscrypt_policy_v2 (24)          version:u8 | contents:u8 | filenames:u8 | flags:u8 |
//!                                 log2_data_unit_size:u8 | __reserved:[u8; 3] | identifier:[u8; 16]
//! fscrypt_policy_v1 (12)          version:u8 | contents:u8 | filenames:u8 | flags:u8 | descriptor:[u8; 8]
//! ```

use std::io;

use zeroize::Zeroizing;

use crate::metadata::{KeyIdentifier, KEY_IDENTIFIER_LENGTH};

/// Key specifier naming a v1 key by 8-byte descriptor.
pub const FSCRYPT_KEY_SPEC_TYPE_DESCRIPTOR: u32 = 1;
/// Key specifier naming a v2 key by 16-byte identifier.
pub const FSCRYPT_KEY_SPEC_TYPE_IDENTIFIER: u32 = 2;

pub const KEY_SPECIFIER_SIZE: usize = 40;
pub const ADD_KEY_HEADER_SIZE: usize = 80;
pub const REMOVE_KEY_ARG_SIZE: usize = 64;
pub const GET_KEY_STATUS_ARG_SIZE: usize = 128;
pub const POLICY_MAX_SIZE: usize = 24;
pub const GET_POLICY_EX_ARG_SIZE: usize = 8 + POLICY_MAX_SIZE;

pub const FSCRYPT_POLICY_V1: u8 = 0;
pub const FSCRYPT_POLICY_V2: u8 = 2;
const POLICY_V1_SIZE: usize = 12;
const POLICY_V1_DESCRIPTOR_SIZE: usize = 8;

pub const FSCRYPT_KEY_REMOVAL_STATUS_FLAG_FILES_BUSY: u32 = 0x0000_0001;
pub const FSCRYPT_KEY_REMOVAL_STATUS_FLAG_OTHER_USERS: u32 = 0x0000_0002;

pub const FSCRYPT_KEY_STATUS_ABSENT: u32 = 1;
pub const FSCRYPT_KEY_STATUS_PRESENT: u32 = 2;
pub const FSCRYPT_KEY_STATUS_INCOMPLETELY_REMOVED: u32 = 3;
pub const FSCRYPT_KEY_STATUS_FLAG_ADDED_BY_SELF: u32 = 0x0000_0001;

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_ne_bytes(raw)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_ne_bytes(raw)
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

/// `struct fscrypt_key_specifier` of type IDENTIFIER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpecifier {
    pub identifier: KeyIdentifier,
}

impl KeySpecifier {
    pub fn by_identifier(identifier: KeyIdentifier) -> Self {
        Self { identifier }
    }

    pub fn encode(&self) -> [u8; KEY_SPECIFIER_SIZE] {
        let mut out = [0u8; KEY_SPECIFIER_SIZE];
        out[0..4].copy_from_slice(&FSCRYPT_KEY_SPEC_TYPE_IDENTIFIER.to_ne_bytes());
        // out[4..8] is __reserved
        out[8..8 + KEY_IDENTIFIER_LENGTH].copy_from_slice(self.identifier.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < KEY_SPECIFIER_SIZE {
            return Err(invalid(format!(
                "key specifier needs {} bytes (got {})",
                KEY_SPECIFIER_SIZE,
                bytes.len()
            )));
        }
        let spec_type = read_u32(bytes, 0);
        if spec_type != FSCRYPT_KEY_SPEC_TYPE_IDENTIFIER {
            return Err(invalid(format!("unexpected key specifier type {}", spec_type)));
        }
        let mut identifier = [0u8; KEY_IDENTIFIER_LENGTH];
        identifier.copy_from_slice(&bytes[8..8 + KEY_IDENTIFIER_LENGTH]);
        Ok(Self {
            identifier: KeyIdentifier(identifier),
        })
    }
}

/// `struct fscrypt_add_key_arg` followed by the raw secret.
pub struct AddKeyArg<'a> {
    pub key_spec: KeySpecifier,
    pub key_id: u32,
    pub raw: &'a [u8],
}

impl<'a> AddKeyArg<'a> {
    pub fn new(key_spec: KeySpecifier, raw: &'a [u8]) -> Self {
        Self {
            key_spec,
            key_id: 0,
            raw,
        }
    }

    /// Pack header and secret; the buffer is zeroized on drop.
    pub fn encode(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(vec![0u8; ADD_KEY_HEADER_SIZE + self.raw.len()]);
        out[..KEY_SPECIFIER_SIZE].copy_from_slice(&self.key_spec.encode());
        out[40..44].copy_from_slice(&(self.raw.len() as u32).to_ne_bytes());
        out[44..48].copy_from_slice(&self.key_id.to_ne_bytes());
        // out[48..80] is __reserved[8]
        out[ADD_KEY_HEADER_SIZE..].copy_from_slice(self.raw);
        out
    }

    /// Unpack the header fields (key specifier, raw_size, key_id).
    pub fn decode_header(bytes: &[u8]) -> io::Result<(KeySpecifier, u32, u32)> {
        if bytes.len() < ADD_KEY_HEADER_SIZE {
            return Err(invalid(format!(
                "add-key argument needs {} bytes (got {})",
                ADD_KEY_HEADER_SIZE,
                bytes.len()
            )));
        }
        let key_spec = KeySpecifier::decode(&bytes[..KEY_SPECIFIER_SIZE])?;
        Ok((key_spec, read_u32(bytes, 40), read_u32(bytes, 44)))
    }
}

/// `struct fscrypt_remove_key_arg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveKeyArg {
    pub key_spec: KeySpecifier,
    pub removal_status_flags: u32,
}

impl RemoveKeyArg {
    pub fn new(key_spec: KeySpecifier) -> Self {
        Self {
            key_spec,
            removal_status_flags: 0,
        }
    }

    pub fn encode(&self) -> [u8; REMOVE_KEY_ARG_SIZE] {
        let mut out = [0u8; REMOVE_KEY_ARG_SIZE];
        out[..KEY_SPECIFIER_SIZE].copy_from_slice(&self.key_spec.encode());
        out[40..44].copy_from_slice(&self.removal_status_flags.to_ne_bytes());
        // out[44..64] is __reserved[5]
        out
    }

    pub fn decode(bytes: &[u8; REMOVE_KEY_ARG_SIZE]) -> io::Result<Self> {
        Ok(Self {
            key_spec: KeySpecifier::decode(&bytes[..KEY_SPECIFIER_SIZE])?,
            removal_status_flags: read_u32(bytes, 40),
        })
    }
}

/// `struct fscrypt_get_key_status_arg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetKeyStatusArg {
    pub key_spec: KeySpecifier,
    pub status: u32,
    pub status_flags: u32,
    pub user_count: u32,
}

impl GetKeyStatusArg {
    pub fn new(key_spec: KeySpecifier) -> Self {
        Self {
            key_spec,
            status: 0,
            status_flags: 0,
            user_count: 0,
        }
    }

    pub fn encode(&self) -> [u8; GET_KEY_STATUS_ARG_SIZE] {
        let mut out = [0u8; GET_KEY_STATUS_ARG_SIZE];
        out[..KEY_SPECIFIER_SIZE].copy_from_slice(&self.key_spec.encode());
        // out[40..64] is __reserved[6]
        out[64..68].copy_from_slice(&self.status.to_ne_bytes());
        out[68..72].copy_from_slice(&self.status_flags.to_ne_bytes());
        out[72..76].copy_from_slice(&self.user_count.to_ne_bytes());
        out
    }

    pub fn decode(bytes: &[u8; GET_KEY_STATUS_ARG_SIZE]) -> io::Result<Self> {
        Ok(Self {
            key_spec: KeySpecifier::decode(&bytes[..KEY_SPECIFIER_SIZE])?,
            status: read_u32(bytes, 64),
            status_flags: read_u32(bytes, 68),
            user_count: read_u32(bytes, 72),
        })
    }

    /// Whether the calling user already holds a claim on the key.
    pub fn held_by_caller(&self) -> bool {
        self.status == FSCRYPT_KEY_STATUS_PRESENT
            && self.status_flags & FSCRYPT_KEY_STATUS_FLAG_ADDED_BY_SELF != 0
    }
}

/// `struct fscrypt_policy_v2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyV2 {
    pub contents_mode: u8,
    pub filenames_mode: u8,
    pub flags: u8,
    pub log2_data_unit_size: u8,
    pub identifier: KeyIdentifier,
}

/// Decoded policy from a GET_ENCRYPTION_POLICY_EX response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionPolicy {
    V1 { descriptor: [u8; POLICY_V1_DESCRIPTOR_SIZE] },
    V2(PolicyV2),
}

/// `struct fscrypt_get_policy_ex_arg`.
pub struct GetPolicyExArg;

impl GetPolicyExArg {
    /// Request buffer: `policy_size` set to the space available, policy zeroed.
    pub fn request() -> [u8; GET_POLICY_EX_ARG_SIZE] {
        let mut out = [0u8; GET_POLICY_EX_ARG_SIZE];
        out[..8].copy_from_slice(&(POLICY_MAX_SIZE as u64).to_ne_bytes());
        out
    }

    /// Build the response the kernel would return for a v2 policy.
    pub fn encode_v2(policy: &PolicyV2) -> [u8; GET_POLICY_EX_ARG_SIZE] {
        let mut out = [0u8; GET_POLICY_EX_ARG_SIZE];
        out[..8].copy_from_slice(&(POLICY_MAX_SIZE as u64).to_ne_bytes());
        out[8] = FSCRYPT_POLICY_V2;
        out[9] = policy.contents_mode;
        out[10] = policy.filenames_mode;
        out[11] = policy.flags;
        out[12] = policy.log2_data_unit_size;
        // out[13..16] is __reserved[3]
        out[16..].copy_from_slice(policy.identifier.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8; GET_POLICY_EX_ARG_SIZE]) -> io::Result<EncryptionPolicy> {
        let size = read_u64(bytes, 0) as usize;
        let policy = &bytes[8..];
        match policy[0] {
            FSCRYPT_POLICY_V1 if size == POLICY_V1_SIZE => {
                let mut descriptor = [0u8; POLICY_V1_DESCRIPTOR_SIZE];
                descriptor.copy_from_slice(&policy[4..POLICY_V1_SIZE]);
                Ok(EncryptionPolicy::V1 { descriptor })
            }
            FSCRYPT_POLICY_V2 if size == POLICY_MAX_SIZE => {
                let mut identifier = [0u8; KEY_IDENTIFIER_LENGTH];
                identifier.copy_from_slice(&policy[8..]);
                Ok(EncryptionPolicy::V2(PolicyV2 {
                    contents_mode: policy[1],
                    filenames_mode: policy[2],
                    flags: policy[3],
                    log2_data_unit_size: policy[4],
                    identifier: KeyIdentifier(identifier),
                }))
            }
            version => Err(invalid(format!(
                "unrecognized policy version {} with size {}",
                version, size
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifier() -> KeyIdentifier {
        KeyIdentifier([
            0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d,
            0x1e, 0x1f,
        ])
    }

    #[test]
    fn test_key_specifier_layout() {
        let bytes = KeySpecifier::by_identifier(identifier()).encode();

        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[0..4], &2u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &[0; 4]);
        assert_eq!(&bytes[8..24], identifier().as_bytes());
        assert!(bytes[24..].iter().all(|b| *b == 0));

        assert_eq!(
            KeySpecifier::decode(&bytes).unwrap().identifier,
            identifier()
        );
    }

    #[test]
    fn test_key_specifier_rejects_descriptor_type() {
        let mut bytes = KeySpecifier::by_identifier(identifier()).encode();
        bytes[0..4].copy_from_slice(&FSCRYPT_KEY_SPEC_TYPE_DESCRIPTOR.to_ne_bytes());
        assert!(KeySpecifier::decode(&bytes).is_err());
    }

    #[test]
    fn test_add_key_layout() {
        let secret = [0xaa; 32];
        let arg = AddKeyArg::new(KeySpecifier::by_identifier(identifier()), &secret);
        let bytes = arg.encode();

        assert_eq!(bytes.len(), 80 + 32);
        assert_eq!(&bytes[40..44], &32u32.to_ne_bytes());
        assert_eq!(&bytes[44..48], &0u32.to_ne_bytes());
        assert!(bytes[48..80].iter().all(|b| *b == 0));
        assert_eq!(&bytes[80..], &secret);

        let (spec, raw_size, key_id) = AddKeyArg::decode_header(&bytes).unwrap();
        assert_eq!(spec.identifier, identifier());
        assert_eq!(raw_size, 32);
        assert_eq!(key_id, 0);
    }

    #[test]
    fn test_remove_key_layout() {
        let mut bytes = RemoveKeyArg::new(KeySpecifier::by_identifier(identifier())).encode();
        assert_eq!(bytes.len(), 64);
        assert!(bytes[40..].iter().all(|b| *b == 0));

        // kernel reports status in place
        bytes[40..44].copy_from_slice(&FSCRYPT_KEY_REMOVAL_STATUS_FLAG_FILES_BUSY.to_ne_bytes());
        let decoded = RemoveKeyArg::decode(&bytes).unwrap();
        assert_eq!(
            decoded.removal_status_flags,
            FSCRYPT_KEY_REMOVAL_STATUS_FLAG_FILES_BUSY
        );
        assert_eq!(decoded.key_spec.identifier, identifier());
    }

    #[test]
    fn test_key_status_layout() {
        let mut bytes = GetKeyStatusArg::new(KeySpecifier::by_identifier(identifier())).encode();
        assert_eq!(bytes.len(), 128);
        assert!(bytes[40..].iter().all(|b| *b == 0));

        bytes[64..68].copy_from_slice(&FSCRYPT_KEY_STATUS_PRESENT.to_ne_bytes());
        bytes[68..72].copy_from_slice(&FSCRYPT_KEY_STATUS_FLAG_ADDED_BY_SELF.to_ne_bytes());
        bytes[72..76].copy_from_slice(&1u32.to_ne_bytes());
        let decoded = GetKeyStatusArg::decode(&bytes).unwrap();
        assert_eq!(decoded.key_spec.identifier, identifier());
        assert_eq!(decoded.user_count, 1);
        assert!(decoded.held_by_caller());
    }

    #[test]
    fn test_key_status_held_by_caller() {
        let mut arg = GetKeyStatusArg::new(KeySpecifier::by_identifier(identifier()));
        arg.status = FSCRYPT_KEY_STATUS_ABSENT;
        assert!(!arg.held_by_caller());

        // present, but only through another user's claim
        arg.status = FSCRYPT_KEY_STATUS_PRESENT;
        assert!(!arg.held_by_caller());

        arg.status = FSCRYPT_KEY_STATUS_INCOMPLETELY_REMOVED;
        arg.status_flags = FSCRYPT_KEY_STATUS_FLAG_ADDED_BY_SELF;
        assert!(!arg.held_by_caller());
    }

    #[test]
    fn test_get_policy_request_layout() {
        let bytes = GetPolicyExArg::request();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..8], &24u64.to_ne_bytes());
        assert!(bytes[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_get_policy_v2_response() {
        let policy = PolicyV2 {
            contents_mode: 1,
            filenames_mode: 4,
            flags: 0x02,
            log2_data_unit_size: 0,
            identifier: identifier(),
        };
        let bytes = GetPolicyExArg::encode_v2(&policy);
        assert_eq!(bytes[8], 2);
        assert_eq!(&bytes[16..], identifier().as_bytes());

        assert_eq!(
            GetPolicyExArg::decode(&bytes).unwrap(),
            EncryptionPolicy::V2(policy)
        );
    }

    #[test]
    fn test_get_policy_v1_response() {
        let mut bytes = [0u8; GET_POLICY_EX_ARG_SIZE];
        bytes[..8].copy_from_slice(&12u64.to_ne_bytes());
        bytes[8] = FSCRYPT_POLICY_V1;
        bytes[12..20].copy_from_slice(&[7; 8]);

        assert_eq!(
            GetPolicyExArg::decode(&bytes).unwrap(),
            EncryptionPolicy::V1 { descriptor: [7; 8] }
        );
    }

    #[test]
    fn test_get_policy_unknown_version() {
        let mut bytes = GetPolicyExArg::request();
        bytes[8] = 9;
        assert!(GetPolicyExArg::decode(&bytes).is_err());
    }
}
