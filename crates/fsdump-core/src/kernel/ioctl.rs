//! ioctl transport for the fscrypt key-management calls.

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use super::abi::{ADD_KEY_HEADER_SIZE, GET_KEY_STATUS_ARG_SIZE, REMOVE_KEY_ARG_SIZE};
use crate::error::{FsdumpError, Result};

/// Encode an `_IOWR` request number (asm-generic layout).
const fn iowr(ty: u8, nr: u8, size: usize) -> u64 {
    (3 << 30) | ((size as u64) << 16) | ((ty as u64) << 8) | nr as u64
}

/// `_IOWR('f', 22, __u8[9])`
pub const FS_IOC_GET_ENCRYPTION_POLICY_EX: u64 = iowr(b'f', 22, 9);
/// `_IOWR('f', 23, struct fscrypt_add_key_arg)`
pub const FS_IOC_ADD_ENCRYPTION_KEY: u64 = iowr(b'f', 23, ADD_KEY_HEADER_SIZE);
/// `_IOWR('f', 24, struct fscrypt_remove_key_arg)`
pub const FS_IOC_REMOVE_ENCRYPTION_KEY: u64 = iowr(b'f', 24, REMOVE_KEY_ARG_SIZE);
/// `_IOWR('f', 26, struct fscrypt_get_key_status_arg)`
pub const FS_IOC_GET_ENCRYPTION_KEY_STATUS: u64 = iowr(b'f', 26, GET_KEY_STATUS_ARG_SIZE);

/// Issue one read/write ioctl against `path`.
///
/// The path is opened read-only for the duration of the call; the
/// descriptor is closed when `file` drops, on success and error alike.
///
/// # Errors
///
/// - `FsdumpError::Io` if the path cannot be opened
/// - `FsdumpError::Ioctl` carrying the errno if the kernel rejects the call
pub(crate) fn ioctl_rw(path: &Path, op: &'static str, request: u64, arg: &mut [u8]) -> Result<()> {
    let file = File::open(path)?;
    // SAFETY: `arg` is a live, exclusively borrowed buffer at least as large
    // as the struct the request number encodes; the kernel writes only within it.
    let result = unsafe { libc::ioctl(file.as_raw_fd(), request as _, arg.as_mut_ptr()) };
    if result < 0 {
        return Err(FsdumpError::ioctl(op, io::Error::last_os_error()));
    }
    tracing::trace!(op, path = %path.display(), "ioctl succeeded");
    Ok(())
}

/// The errno of a failed ioctl, if that is what `err` is.
pub(crate) fn errno(err: &FsdumpError) -> Option<i32> {
    match err {
        FsdumpError::Ioctl { source, .. } => source.raw_os_error(),
        _ => None,
    }
}
