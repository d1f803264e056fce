//! Filesystem helpers for staging mounts
//!
//! Every failure is reported as [`StowageError::FilesystemStaging`] naming
//! the action and the path it was applied to.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use stowage_core::{Result, StowageError};
use tracing::debug;
use walkdir::WalkDir;

/// Creates a fresh, uniquely named directory from `prefix`
///
/// `/tmp/stowage-` yields something like `/tmp/stowage-a81Xk2`. The
/// directory outlives this call; the job owns it from here on.
pub fn create_scratch_dir(prefix: &Path) -> Result<PathBuf> {
    let parent = prefix
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = prefix
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    fs::create_dir_all(parent).map_err(|e| StowageError::staging("create directory", parent, e))?;
    let dir = tempfile::Builder::new()
        .prefix(&name)
        .tempdir_in(parent)
        .map_err(|e| StowageError::staging("create scratch directory in", parent, e))?
        .keep();
    debug!("created scratch directory {}", dir.display());
    Ok(dir)
}

/// Copies a file; copying onto an existing directory copies into it
pub fn copy_file(src: &Path, dst: &Path) -> Result<PathBuf> {
    let dst = if dst.is_dir() {
        dst.join(file_name_of(src))
    } else {
        dst.to_path_buf()
    };
    ensure_parent(&dst)?;
    fs::copy(src, &dst).map_err(|e| StowageError::staging("copy", src, e))?;
    Ok(dst)
}

/// Hard links the canonical `src` to `dst`, copying on any link failure
pub fn hard_link_or_copy(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent(dst)?;
    let linked = fs::canonicalize(src).and_then(|real| fs::hard_link(real, dst));
    if let Err(e) = linked {
        debug!(
            "hard link {} -> {} failed ({}), copying instead",
            src.display(),
            dst.display(),
            e
        );
        copy_file(src, dst)?;
    }
    Ok(())
}

/// Recursively copies the tree at `src` to `dst`, which must not exist yet
///
/// Symlinks are followed so the copy is self-contained.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent(dst)?;
    fs::create_dir(dst).map_err(|e| StowageError::staging("create directory", dst, e))?;

    for entry in WalkDir::new(src).follow_links(true).min_depth(1) {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| StowageError::staging("copy", entry.path(), io::Error::other(e)))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| StowageError::staging("create directory", &target, e))?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|e| StowageError::staging("copy", entry.path(), e))?;
        }
    }
    Ok(())
}

/// Creates a brand new empty directory; an existing one is an error
pub fn create_empty_dir(path: &Path) -> Result<()> {
    ensure_parent(path)?;
    fs::create_dir(path).map_err(|e| StowageError::staging("create directory", path, e))
}

/// Writes inline contents to a new file
pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    ensure_parent(path)?;
    fs::write(path, contents).map_err(|e| StowageError::staging("write", path, e))
}

/// Grants the owner write access to a file, or to a directory and everything below it
pub fn ensure_writable(path: &Path) -> Result<()> {
    for_each_entry(path, true, |p| set_writable(p, true))
}

/// Removes write access from a file, or from everything below a directory
///
/// The directory itself stays writable so the job can clean it up.
pub fn ensure_non_writable(path: &Path) -> Result<()> {
    for_each_entry(path, false, |p| set_writable(p, false))
}

fn for_each_entry<F>(path: &Path, include_root: bool, mut apply: F) -> Result<()>
where
    F: FnMut(&Path) -> Result<()>,
{
    if !path.is_dir() {
        return apply(path);
    }
    let min_depth = if include_root { 0 } else { 1 };
    for entry in WalkDir::new(path).min_depth(min_depth) {
        let entry = entry.map_err(|e| walk_error(path, e))?;
        apply(entry.path())?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_writable(path: &Path, writable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = fs::symlink_metadata(path).map_err(|e| StowageError::staging("stat", path, e))?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    let mode = meta.permissions().mode();
    let mode = if writable { mode | 0o200 } else { mode & !0o222 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| StowageError::staging("change permissions of", path, e))
}

#[cfg(not(unix))]
fn set_writable(path: &Path, writable: bool) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| StowageError::staging("stat", path, e))?;
    let mut permissions = meta.permissions();
    permissions.set_readonly(!writable);
    fs::set_permissions(path, permissions)
        .map_err(|e| StowageError::staging("change permissions of", path, e))
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|e| StowageError::staging("create directory", parent, e)),
        _ => Ok(()),
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> StowageError {
    let path = err.path().unwrap_or(root).to_path_buf();
    StowageError::staging("walk", path, err.into())
}

/// Final component of `path`, used to name copies inside scratch directories
pub fn file_name_of(path: &Path) -> PathBuf {
    path.file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("staged"))
}
