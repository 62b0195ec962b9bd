//! Recursive copy of an unlocked directory tree.

use std::fs;
use std::io;
use std::path::Path;

use crate::interrupt::Interrupt;

/// Totals for one copied tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub bytes: u64,
}

/// Copy `src` to `dest`, creating `dest`'s parents as needed.
///
/// `dest` itself must not exist. Symlinks are recreated, not followed.
/// Stops with `ErrorKind::Interrupted` at the next entry once `interrupt` is raised.
pub fn copy_tree(src: &Path, dest: &Path, interrupt: &Interrupt) -> io::Result<CopyStats> {
    if !fs::metadata(src)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a directory", src.display()),
        ));
    }
    if fs::symlink_metadata(dest).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", dest.display()),
        ));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut stats = CopyStats::default();
    copy_dir(src, dest, interrupt, &mut stats)?;
    Ok(stats)
}

fn copy_dir(
    src: &Path,
    dest: &Path,
    interrupt: &Interrupt,
    stats: &mut CopyStats,
) -> io::Result<()> {
    fs::create_dir(dest)?;
    stats.dirs += 1;

    for entry in fs::read_dir(src)? {
        interrupt.check()?;
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copy_dir(&from, &to, interrupt, stats)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&from)?;
            std::os::unix::fs::symlink(&target, &to)?;
            stats.symlinks += 1;
        } else if file_type.is_file() {
            stats.bytes += fs::copy(&from, &to)?;
            stats.files += 1;
        } else {
            tracing::warn!(path = %from.display(), "skipping special file");
        }
    }

    // Directory permissions are applied last so read-only directories can be filled.
    fs::set_permissions(dest, fs::metadata(src)?.permissions())?;
    tracing::debug!(src = %src.display(), dest = %dest.display(), "copied directory");
    Ok(())
}
