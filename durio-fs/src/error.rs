//! Error type shared by all filesystem operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from filesystem operations.
///
/// The variants carry the semantic kind of the failure rather than the raw
/// OS error, because the durable-operations layer branches on some of them
/// (`NotEmpty` signals the rename-and-stage path inside subtree deletion,
/// `NotFound` is benign for deletions, `AlreadyExists` is benign for lost
/// directory-creation races). Anything without a semantic kind falls through
/// to `Io`.
#[derive(Debug, Error)]
pub enum FsError {
    /// The operation needs a parent directory but the path has none.
    #[error("path has no parent: {0}")]
    NoParent(PathBuf),

    /// The operation needs a final path component but the path has none.
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    #[error("no such entry: {0}")]
    NotFound(PathBuf),

    #[error("entry already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("directory not empty: {0}")]
    NotEmpty(PathBuf),

    /// The target of a move names a directory, which cannot be replaced.
    #[error("target is a directory: {0}")]
    IsDirectory(PathBuf),

    /// The platform or filesystem cannot perform the operation, for
    /// instance an atomic rename across filesystem boundaries.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// `commit` was called on a directory modification scope after `close`.
    #[error("directory modification scope is closed")]
    ScopeClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> io::Error {
        match err {
            FsError::Io(e) => e,
            FsError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            FsError::AlreadyExists(_) => io::Error::new(io::ErrorKind::AlreadyExists, err),
            FsError::NotEmpty(_) => io::Error::new(io::ErrorKind::DirectoryNotEmpty, err),
            FsError::IsDirectory(_) => io::Error::new(io::ErrorKind::IsADirectory, err),
            FsError::NotSupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            FsError::NoParent(_) | FsError::NoFileName(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            FsError::ScopeClosed => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}
