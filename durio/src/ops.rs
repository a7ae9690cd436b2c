//! Durable compound operations over an abstract filesystem.
//!
//! Every operation here follows the same discipline: open a handle on the
//! directory that will be modified, perform the modification, sync the
//! handle, release it. Opening the handle first matters because a directory
//! sync only covers changes made after the handle was opened.

use std::ffi::OsStr;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use durio_fs::{paths, Filesystem, FsError};

use crate::stream::{AtomicDurableOutputStream, BUFFER_SIZE};

/// Name under which `atomically_delete` stages a subtree inside its scratch
/// directory before tearing it down.
const STAGED_SUBTREE_NAME: &str = "doomed";

/// Stateless façade exposing the durable operations over a filesystem.
///
/// Holds no mutable state of its own; it is safe to share and cheap to
/// clone when the filesystem value is.
#[derive(Debug, Clone)]
pub struct DurableOps<F> {
    fs: F,
}

impl<F: Filesystem> DurableOps<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    /// The underlying filesystem.
    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Create every missing component of `path`, making each new component
    /// durable before descending into it.
    ///
    /// On return every component of `path` exists as a directory. A failure
    /// partway through may leave a prefix of the components created, but
    /// each created prefix is individually durable. Losing a creation race
    /// to another actor is benign as long as the winner created a
    /// directory; a conflicting non-directory entry surfaces as
    /// [`FsError::AlreadyExists`].
    pub fn create_directories(&self, path: &Path) -> Result<(), FsError> {
        let path = paths::absolute(path)?;
        let mut current = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => {
                    current.push(component.as_os_str());
                }
                Component::CurDir => {}
                // `..` always names an existing directory; nothing to create.
                Component::ParentDir => current.push(".."),
                Component::Normal(name) => {
                    current = self.create_one_directory(&current, name)?;
                }
            }
        }
        debug!(path = %path.display(), "directory tree durably created");
        Ok(())
    }

    /// Create `name` inside `parent` (unless it already is a directory) and
    /// make the change durable. Returns the created path.
    fn create_one_directory(&self, parent: &Path, name: &OsStr) -> Result<PathBuf, FsError> {
        let created = parent.join(name);
        let dir = self.fs.open_directory(parent)?;
        // Check first: the target often exists while the parent is not
        // writable to us.
        if !self.fs.is_readable_directory(&dir, name)? {
            if let Err(err) = self.fs.mkdir(&dir, name) {
                let lost_benign_race = matches!(err, FsError::AlreadyExists(_))
                    && self.fs.is_readable_directory(&dir, name)?;
                if !lost_benign_race {
                    return Err(err);
                }
            }
        }
        self.fs.sync_dir(&dir)?;
        Ok(created)
    }

    /// Atomically and durably rename `source` to `target`.
    ///
    /// After success `target` has the original contents of `source`,
    /// `source` no longer exists, and both facts are durable. A target
    /// naming a directory fails with [`FsError::IsDirectory`]; a move
    /// across filesystems fails with [`FsError::NotSupported`].
    pub fn move_entry(&self, source: &Path, target: &Path) -> Result<(), FsError> {
        self.rename_durably(source, target, true)
    }

    /// As [`move_entry`](Self::move_entry), but only the target parent is
    /// synced, so the durable deletion of the source entry is not promised.
    /// Appropriate when the source is scratch data, like the staging file
    /// behind an output stream.
    pub fn move_without_promising_source_deletion(
        &self,
        source: &Path,
        target: &Path,
    ) -> Result<(), FsError> {
        self.rename_durably(source, target, false)
    }

    fn rename_durably(
        &self,
        source: &Path,
        target: &Path,
        durable_source_deletion: bool,
    ) -> Result<(), FsError> {
        let source = paths::absolute(source)?;
        let source_parent_path = paths::parent_of(&source)?;
        let source_name = paths::file_name_of(&source)?;
        let target = paths::absolute(target)?;
        let target_parent_path = paths::parent_of(&target)?;
        let target_name = paths::file_name_of(&target)?;

        // Both handles are opened before the rename so that the syncs
        // cover it. When source and target share a parent the two handles
        // refer to the same inode and both syncs remain well-defined.
        let source_parent = self.fs.open_directory(&source_parent_path)?;
        let target_parent = self.fs.open_directory(&target_parent_path)?;
        self.fs
            .rename(&source_parent, &source_name, &target_parent, &target_name)?;
        self.fs.sync_dir(&target_parent)?;
        if durable_source_deletion {
            self.fs.sync_dir(&source_parent)?;
        }
        debug!(
            source = %source.display(),
            target = %target.display(),
            "entry durably renamed"
        );
        Ok(())
    }

    /// Atomically and durably delete the entry at `path` and everything
    /// below it.
    ///
    /// From the perspective of the parent directory the entry either
    /// durably existed before the call or durably does not exist after it;
    /// no partially deleted subtree is ever observable at `path`. A missing
    /// entry fails with [`FsError::NotFound`]. Deleting a non-empty
    /// directory stages the whole subtree into a scratch directory with one
    /// atomic rename; if the system temp area lives on a different
    /// filesystem that rename fails with [`FsError::NotSupported`].
    ///
    /// The staged subtree is torn down after the parent sync with no crash
    /// guarantees; debris left in the temp area by a crash is acceptable.
    pub fn atomically_delete(&self, path: &Path) -> Result<(), FsError> {
        let path = paths::absolute(path)?;
        let parent_path = paths::parent_of(&path)?;
        let name = paths::file_name_of(&path)?;

        let parent = self.fs.open_directory(&parent_path)?;
        let mut staged: Option<PathBuf> = None;
        match self.fs.unlink(&parent, &name) {
            // A plain file or an empty directory, gone in one step.
            Ok(()) => {}
            Err(FsError::NotEmpty(_)) => {
                let scratch = self.fs.create_temp_dir()?;
                self.fs
                    .move_atomically(&path, &scratch.join(STAGED_SUBTREE_NAME))?;
                staged = Some(scratch);
            }
            Err(err) => return Err(err),
        }
        self.fs.sync_dir(&parent)?;
        drop(parent);

        // The entry is durably gone from its parent; everything below is
        // optional cleanup and must not affect the outcome. Running it
        // after the sync means a crash here cannot revive the entry.
        if let Some(scratch) = staged {
            if let Err(err) = self.delete_tree_unsafe(&scratch) {
                warn!(
                    staged = %scratch.display(),
                    error = %err,
                    "cleanup of staged subtree failed, leaving debris in the temp area"
                );
            }
        }
        debug!(path = %path.display(), "entry durably deleted");
        Ok(())
    }

    /// Walk the tree iteratively, deleting `root` and all of its children.
    /// No crash guarantees of any kind.
    fn delete_tree_unsafe(&self, root: &Path) -> Result<(), FsError> {
        let mut pending = vec![root.to_path_buf()];
        while let Some(path) = pending.last().cloned() {
            match self.fs.delete_if_exists(&path) {
                Ok(()) => {
                    pending.pop();
                }
                Err(FsError::NotEmpty(_)) => {
                    for name in self.fs.list(&path)? {
                        pending.push(path.join(name));
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl<F: Filesystem + Clone> DurableOps<F> {
    /// Write `bytes` to `path` atomically and durably, creating missing
    /// intermediate directories.
    ///
    /// The file itself appears atomically: an observer sees `path` either
    /// absent or holding the complete bytes. The intermediate directories
    /// are not created atomically as a group; each is individually durable.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), FsError> {
        let path = paths::absolute(path)?;
        let parent = paths::parent_of(&path)?;
        let mut out = AtomicDurableOutputStream::create_in(self.clone(), &path)?;
        out.write_bytes(bytes)?;
        self.create_directories(&parent)?;
        out.commit()
    }

    /// As [`write`](Self::write), consuming `data` in fixed-size chunks.
    pub fn write_reader<R: Read>(&self, path: &Path, mut data: R) -> Result<(), FsError> {
        let path = paths::absolute(path)?;
        let parent = paths::parent_of(&path)?;
        let mut out = AtomicDurableOutputStream::create_in(self.clone(), &path)?;
        let mut chunk = [0u8; BUFFER_SIZE];
        loop {
            let nread = data.read(&mut chunk)?;
            if nread == 0 {
                break;
            }
            out.write_bytes(&chunk[..nread])?;
        }
        self.create_directories(&parent)?;
        out.commit()
    }
}
