//! Scoped durability for directory modifications.

use std::path::Path;

use durio_fs::{paths, Filesystem, FsError, RealFilesystem};

/// A scope that makes changes to one directory durable on
/// [`commit`](DirectoryModificationScope::commit).
///
/// Many filesystem operations (creating, renaming, or deleting a file) are
/// really modifications of the parent directory. This type pins a handle on
/// the directory so those modifications can be flushed.
///
/// Construct the scope *before* making the changes you need durable:
/// a directory sync only covers changes made after the handle was opened,
/// so modifications that precede construction may not be flushed by
/// `commit`. The handle is also bound to the directory's inode, not its
/// path; if the directory is replaced on disk after construction, `commit`
/// flushes the original inode.
///
/// ```no_run
/// use std::path::Path;
///
/// # fn main() -> Result<(), durio::FsError> {
/// let scope = durio::DirectoryModificationScope::open(Path::new("/var/data"))?;
/// std::fs::write("/var/data/new-entry", b"contents")?;
/// scope.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct DirectoryModificationScope<F: Filesystem = RealFilesystem> {
    fs: F,
    dir: Option<F::Dir>,
}

impl DirectoryModificationScope<RealFilesystem> {
    /// Open a scope on a directory of the real filesystem.
    pub fn open(directory: &Path) -> Result<Self, FsError> {
        Self::open_in(RealFilesystem, directory)
    }
}

impl<F: Filesystem> DirectoryModificationScope<F> {
    /// Open a scope on a directory of the given filesystem.
    pub fn open_in(fs: F, directory: &Path) -> Result<Self, FsError> {
        let dir = fs.open_directory(&paths::absolute(directory)?)?;
        Ok(Self { fs, dir: Some(dir) })
    }

    /// Make durable any changes to the directory made since this scope was
    /// constructed. May be called more than once while the scope is open;
    /// fails with [`FsError::ScopeClosed`] after [`close`](Self::close).
    pub fn commit(&self) -> Result<(), FsError> {
        match &self.dir {
            Some(dir) => self.fs.sync_dir(dir),
            None => Err(FsError::ScopeClosed),
        }
    }

    /// Release the directory handle. Idempotent; dropping the scope has the
    /// same effect.
    pub fn close(&mut self) {
        self.dir = None;
    }
}
