//! The filesystem capability trait.
//!
//! A small set of low-level operations over directories and files, abstracted
//! so the same durable algorithms run against the physical filesystem and
//! against model implementations that simulate crashes. No operation in this
//! trait provides durability on its own; durability is composed one layer up
//! by sequencing `sync_dir` and `sync_file` calls around the mutations.

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::error::FsError;
use crate::paths;

/// Uniform low-level filesystem operations.
///
/// `Dir` and `File` are open handles to an inode, owned by the caller that
/// opened them and released by dropping them. A directory handle follows the
/// inode, not the path: if the directory is replaced on disk between open and
/// sync, the sync affects the originally opened inode. `sync_dir` only
/// promises to cover changes made after the handle was opened, so every
/// caller that needs a directory change durable must open the handle first,
/// modify, then sync.
pub trait Filesystem {
    /// Open directory handle type.
    type Dir;
    /// Open file handle type, writable.
    type File;

    /// Create a fresh empty directory in the temp area and return its path.
    fn create_temp_dir(&self) -> Result<PathBuf, FsError>;

    /// Create a fresh empty regular file in the temp area and return its path.
    fn create_temp_file(&self) -> Result<PathBuf, FsError>;

    /// Open a handle on an existing directory.
    fn open_directory(&self, path: &Path) -> Result<Self::Dir, FsError>;

    /// The set of entry names in the directory at `path`.
    fn list(&self, path: &Path) -> Result<BTreeSet<OsString>, FsError>;

    /// Whether `name` inside `parent` is a readable directory.
    fn is_readable_directory(&self, parent: &Self::Dir, name: &OsStr) -> Result<bool, FsError>;

    /// Create the directory `name` inside `parent`.
    fn mkdir(&self, parent: &Self::Dir, name: &OsStr) -> Result<(), FsError>;

    /// Remove the entry `name` inside `parent`. Removes regular files and
    /// empty directories; fails with [`FsError::NotEmpty`] for a non-empty
    /// directory and [`FsError::NotFound`] for a missing entry.
    fn unlink(&self, parent: &Self::Dir, name: &OsStr) -> Result<(), FsError>;

    /// Atomically rename `source_name` in `source_parent` to `target_name`
    /// in `target_parent`, replacing a target file if one exists. Fails with
    /// [`FsError::IsDirectory`] when the target names a directory and
    /// [`FsError::NotSupported`] when the rename would cross filesystems.
    fn rename(
        &self,
        source_parent: &Self::Dir,
        source_name: &OsStr,
        target_parent: &Self::Dir,
        target_name: &OsStr,
    ) -> Result<(), FsError>;

    /// Make durable all changes to the directory's contents made since the
    /// handle was opened.
    fn sync_dir(&self, dir: &Self::Dir) -> Result<(), FsError>;

    /// Open a handle for writing to the regular file at `path`, truncating
    /// existing contents.
    fn open_file(&self, path: &Path) -> Result<Self::File, FsError>;

    /// Append `data` to the file through the handle.
    fn write(&self, file: &mut Self::File, data: &[u8]) -> Result<(), FsError>;

    /// Make durable all bytes written through the handle.
    fn sync_file(&self, file: &Self::File) -> Result<(), FsError>;

    /// Remove the entry at `path` if it exists. A missing entry is success.
    ///
    /// Implementations may override this with a more direct equivalent.
    fn delete_if_exists(&self, path: &Path) -> Result<(), FsError> {
        let path = paths::absolute(path)?;
        let parent = paths::parent_of(&path)?;
        let name = paths::file_name_of(&path)?;
        let dir = self.open_directory(&parent)?;
        match self.unlink(&dir, &name) {
            Err(FsError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Atomically rename the entry at `source` to `target`. Offers no
    /// durability; callers that need the rename durable must sync the parent
    /// directories themselves.
    ///
    /// Implementations may override this with a more direct equivalent.
    fn move_atomically(&self, source: &Path, target: &Path) -> Result<(), FsError> {
        let source = paths::absolute(source)?;
        let target = paths::absolute(target)?;
        let source_parent = self.open_directory(&paths::parent_of(&source)?)?;
        let target_parent = self.open_directory(&paths::parent_of(&target)?)?;
        self.rename(
            &source_parent,
            &paths::file_name_of(&source)?,
            &target_parent,
            &paths::file_name_of(&target)?,
        )
    }
}
