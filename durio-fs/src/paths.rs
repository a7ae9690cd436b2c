//! Path promotion helpers.
//!
//! Every durable operation promotes its arguments to absolute form before
//! touching the filesystem, then splits them into a parent directory and an
//! entry name. Promotion is lexical: it prepends the current directory and
//! normalizes `.` components but does not resolve symlinks or `..`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::FsError;

/// Promote `path` to absolute form.
pub fn absolute(path: &Path) -> Result<PathBuf, FsError> {
    Ok(std::path::absolute(path)?)
}

/// The parent directory of `path`, or `NoParent` for a filesystem root.
pub fn parent_of(path: &Path) -> Result<PathBuf, FsError> {
    path.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| FsError::NoParent(path.to_path_buf()))
}

/// The final component of `path`, or `NoFileName` for a filesystem root.
pub fn file_name_of(path: &Path) -> Result<OsString, FsError> {
    path.file_name()
        .map(OsString::from)
        .ok_or_else(|| FsError::NoFileName(path.to_path_buf()))
}
