//! Tree walking helpers shared by staging and the image backends.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};

/// Filesystem block size every size computation is rounded to.
pub const BLOCK_SIZE: u64 = 4096;

/// Round `size` up to a multiple of `unit`, which must be a power of two.
pub fn round_up(size: u64, unit: u64) -> u64 {
    debug_assert!(unit.is_power_of_two());
    (size + unit - 1) & !(unit - 1)
}

fn walk_error(root: &Path, err: walkdir::Error) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    Error::Io {
        context: "Cannot walk",
        path,
        source: err.into(),
    }
}

/// Block-rounded byte size of a tree.
///
/// Directories count their own size; files (and links to files) count the
/// size of what they point to. Dangling links and special files count zero.
pub fn dir_size(root: &Path) -> Result<u64> {
    let mut size = 0;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_dir() {
            let meta = entry.metadata().map_err(|e| walk_error(root, e))?;
            size += round_up(meta.len(), BLOCK_SIZE);
        } else if let Ok(meta) = fs::metadata(entry.path()) {
            if meta.is_file() {
                size += round_up(meta.len(), BLOCK_SIZE);
            }
        }
    }
    Ok(size)
}

/// Number of files, links and directories below `root` (excluding `root`).
pub fn count_entries(root: &Path) -> Result<u64> {
    let mut count = 0;
    for entry in WalkDir::new(root).min_depth(1) {
        entry.map_err(|e| walk_error(root, e))?;
        count += 1;
    }
    Ok(count)
}

/// Copy a file or a symlink. Links are recreated, never followed.
pub fn copy_entry(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).io_context("Cannot stat", src)?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(src).io_context("Cannot read link", src)?;
        if fs::symlink_metadata(dst).is_ok() {
            fs::remove_file(dst).io_context("Cannot replace", dst)?;
        }
        symlink(&target, dst).io_context("Cannot create link", dst)?;
    } else {
        fs::copy(src, dst).io_context("Cannot copy to", dst)?;
    }
    Ok(())
}

/// Copy the contents of `src` into `dst`, preserving links and permissions.
///
/// Existing directories in `dst` are merged into.
pub fn copy_tree_contents(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| Error::InvalidInput(format!("{} escapes {}", entry.path().display(), src.display())))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).io_context("Cannot create directory", &target)?;
            let perms = entry.metadata().map_err(|e| walk_error(src, e))?.permissions();
            fs::set_permissions(&target, perms).io_context("Cannot set permissions on", &target)?;
        } else {
            copy_entry(entry.path(), &target)?;
        }
    }
    Ok(())
}
