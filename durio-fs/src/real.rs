//! Physical filesystem implementation.
//!
//! Directories are opened read-only as plain [`File`]s so they can be
//! fsynced; on POSIX systems a read-only descriptor is sufficient for
//! `fsync(2)` on a directory. OS errors are mapped per operation onto the
//! semantic [`FsError`] variants the durable layer branches on.

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::FsError;
use crate::fs::Filesystem;
use crate::paths;

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFilesystem;

/// An open handle to a physical directory.
///
/// The handle is bound to the inode that `path` named at open time; syncing
/// after the directory was replaced on disk affects the original inode.
#[derive(Debug)]
pub struct RealDirectory {
    path: PathBuf,
    file: File,
}

impl RealDirectory {
    /// The path this handle was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An open handle to a physical regular file, writable.
#[derive(Debug)]
pub struct RealFile {
    file: File,
}

fn not_found_or_io(err: io::Error, path: &Path) -> FsError {
    match err.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
        _ => FsError::Io(err),
    }
}

fn map_rename_error(err: io::Error, source: &Path, target: &Path) -> FsError {
    match err.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(source.to_path_buf()),
        // EISDIR for a file over a directory; ENOTEMPTY (or EEXIST on the
        // BSDs) for a directory over a non-empty directory.
        io::ErrorKind::IsADirectory
        | io::ErrorKind::DirectoryNotEmpty
        | io::ErrorKind::AlreadyExists => FsError::IsDirectory(target.to_path_buf()),
        io::ErrorKind::CrossesDevices => FsError::NotSupported(format!(
            "atomic rename across filesystems: {} -> {}",
            source.display(),
            target.display()
        )),
        _ => FsError::Io(err),
    }
}

/// Remove a file or an empty directory.
fn remove_entry(path: &Path) -> Result<(), FsError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| not_found_or_io(e, path))?;
    let removed = if metadata.is_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.to_path_buf()),
        io::ErrorKind::DirectoryNotEmpty => FsError::NotEmpty(path.to_path_buf()),
        _ => FsError::Io(e),
    })
}

impl Filesystem for RealFilesystem {
    type Dir = RealDirectory;
    type File = RealFile;

    fn create_temp_dir(&self) -> Result<PathBuf, FsError> {
        Ok(tempfile::tempdir()?.keep())
    }

    fn create_temp_file(&self) -> Result<PathBuf, FsError> {
        let (file, path) = tempfile::NamedTempFile::new()?
            .keep()
            .map_err(|e| FsError::Io(e.error))?;
        drop(file);
        Ok(path)
    }

    fn open_directory(&self, path: &Path) -> Result<RealDirectory, FsError> {
        let file = File::open(path).map_err(|e| not_found_or_io(e, path))?;
        let metadata = file.metadata()?;
        if !metadata.is_dir() {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {}", path.display()),
            )));
        }
        Ok(RealDirectory {
            path: path.to_path_buf(),
            file,
        })
    }

    fn list(&self, path: &Path) -> Result<BTreeSet<OsString>, FsError> {
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(path).map_err(|e| not_found_or_io(e, path))? {
            names.insert(entry?.file_name());
        }
        Ok(names)
    }

    fn is_readable_directory(&self, parent: &RealDirectory, name: &OsStr) -> Result<bool, FsError> {
        Ok(fs::metadata(parent.path.join(name)).map_or(false, |m| m.is_dir()))
    }

    fn mkdir(&self, parent: &RealDirectory, name: &OsStr) -> Result<(), FsError> {
        let path = parent.path.join(name);
        fs::create_dir(&path).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.clone()),
            _ => not_found_or_io(e, &path),
        })
    }

    fn unlink(&self, parent: &RealDirectory, name: &OsStr) -> Result<(), FsError> {
        remove_entry(&parent.path.join(name))
    }

    fn rename(
        &self,
        source_parent: &RealDirectory,
        source_name: &OsStr,
        target_parent: &RealDirectory,
        target_name: &OsStr,
    ) -> Result<(), FsError> {
        let source = source_parent.path.join(source_name);
        let target = target_parent.path.join(target_name);
        // rename(2) lets a directory source replace an empty directory
        // target; the contract rejects any directory target.
        if fs::symlink_metadata(&target).map_or(false, |m| m.is_dir()) {
            return Err(FsError::IsDirectory(target));
        }
        fs::rename(&source, &target).map_err(|e| map_rename_error(e, &source, &target))
    }

    #[cfg(unix)]
    fn sync_dir(&self, dir: &RealDirectory) -> Result<(), FsError> {
        Ok(dir.file.sync_all()?)
    }

    // Without directory fsync, directory changes are only best-effort
    // durable.
    #[cfg(not(unix))]
    fn sync_dir(&self, _dir: &RealDirectory) -> Result<(), FsError> {
        Ok(())
    }

    fn open_file(&self, path: &Path) -> Result<RealFile, FsError> {
        let file = File::create(path).map_err(|e| not_found_or_io(e, path))?;
        Ok(RealFile { file })
    }

    fn write(&self, file: &mut RealFile, data: &[u8]) -> Result<(), FsError> {
        Ok(file.file.write_all(data)?)
    }

    fn sync_file(&self, file: &RealFile) -> Result<(), FsError> {
        Ok(file.file.sync_all()?)
    }

    fn delete_if_exists(&self, path: &Path) -> Result<(), FsError> {
        let path = paths::absolute(path)?;
        match remove_entry(&path) {
            Err(FsError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    fn move_atomically(&self, source: &Path, target: &Path) -> Result<(), FsError> {
        let source = paths::absolute(source)?;
        let target = paths::absolute(target)?;
        // Same directory-target check as `rename`.
        if fs::symlink_metadata(&target).map_or(false, |m| m.is_dir()) {
            return Err(FsError::IsDirectory(target));
        }
        fs::rename(&source, &target).map_err(|e| map_rename_error(e, &source, &target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FS: RealFilesystem = RealFilesystem;

    #[test]
    fn test_open_directory_on_missing_path_fails_not_found() {
        let root = tempdir().unwrap();
        let result = FS.open_directory(&root.path().join("absent"));
        assert!(matches!(result, Err(FsError::NotFound(_))));
    }

    #[test]
    fn test_open_directory_on_file_fails() {
        let root = tempdir().unwrap();
        let file = root.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(FS.open_directory(&file).is_err());
    }

    #[test]
    fn test_mkdir_creates_and_rejects_duplicates() {
        let root = tempdir().unwrap();
        let dir = FS.open_directory(root.path()).unwrap();
        FS.mkdir(&dir, OsStr::new("sub")).unwrap();
        assert!(root.path().join("sub").is_dir());
        assert!(matches!(
            FS.mkdir(&dir, OsStr::new("sub")),
            Err(FsError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_is_readable_directory() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        fs::write(root.path().join("file"), b"x").unwrap();
        let dir = FS.open_directory(root.path()).unwrap();
        assert!(FS.is_readable_directory(&dir, OsStr::new("sub")).unwrap());
        assert!(!FS.is_readable_directory(&dir, OsStr::new("file")).unwrap());
        assert!(!FS.is_readable_directory(&dir, OsStr::new("absent")).unwrap());
    }

    #[test]
    fn test_unlink_removes_files_and_empty_directories() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("file"), b"x").unwrap();
        fs::create_dir(root.path().join("empty")).unwrap();
        let dir = FS.open_directory(root.path()).unwrap();

        FS.unlink(&dir, OsStr::new("file")).unwrap();
        FS.unlink(&dir, OsStr::new("empty")).unwrap();
        assert!(!root.path().join("file").exists());
        assert!(!root.path().join("empty").exists());
    }

    #[test]
    fn test_unlink_missing_entry_fails_not_found() {
        let root = tempdir().unwrap();
        let dir = FS.open_directory(root.path()).unwrap();
        assert!(matches!(
            FS.unlink(&dir, OsStr::new("absent")),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_unlink_non_empty_directory_fails_not_empty() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("full")).unwrap();
        fs::write(root.path().join("full").join("child"), b"x").unwrap();
        let dir = FS.open_directory(root.path()).unwrap();
        assert!(matches!(
            FS.unlink(&dir, OsStr::new("full")),
            Err(FsError::NotEmpty(_))
        ));
    }

    #[test]
    fn test_rename_replaces_target_file() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("a"), b"new").unwrap();
        fs::write(root.path().join("b"), b"old").unwrap();
        let dir = FS.open_directory(root.path()).unwrap();

        FS.rename(&dir, OsStr::new("a"), &dir, OsStr::new("b"))
            .unwrap();
        assert!(!root.path().join("a").exists());
        assert_eq!(fs::read(root.path().join("b")).unwrap(), b"new");
    }

    #[test]
    fn test_rename_onto_directory_fails_is_directory() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();
        fs::create_dir(root.path().join("d")).unwrap();
        let dir = FS.open_directory(root.path()).unwrap();
        assert!(matches!(
            FS.rename(&dir, OsStr::new("a"), &dir, OsStr::new("d")),
            Err(FsError::IsDirectory(_))
        ));
    }

    #[test]
    fn test_rename_directory_onto_empty_directory_fails() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("src")).unwrap();
        fs::write(root.path().join("src").join("leaf"), b"x").unwrap();
        fs::create_dir(root.path().join("empty")).unwrap();
        let dir = FS.open_directory(root.path()).unwrap();
        assert!(matches!(
            FS.rename(&dir, OsStr::new("src"), &dir, OsStr::new("empty")),
            Err(FsError::IsDirectory(_))
        ));
        assert!(root.path().join("src").join("leaf").exists());
        assert!(root.path().join("empty").is_dir());
    }

    #[test]
    fn test_move_atomically_onto_empty_directory_fails() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("src")).unwrap();
        fs::create_dir(root.path().join("empty")).unwrap();
        assert!(matches!(
            FS.move_atomically(&root.path().join("src"), &root.path().join("empty")),
            Err(FsError::IsDirectory(_))
        ));
        assert!(root.path().join("src").is_dir());
        assert!(root.path().join("empty").is_dir());
    }

    #[test]
    fn test_rename_missing_source_fails_not_found() {
        let root = tempdir().unwrap();
        let dir = FS.open_directory(root.path()).unwrap();
        assert!(matches!(
            FS.rename(&dir, OsStr::new("absent"), &dir, OsStr::new("b")),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_returns_entry_names() {
        let root = tempdir().unwrap();
        fs::write(root.path().join("a"), b"x").unwrap();
        fs::create_dir(root.path().join("b")).unwrap();
        let names = FS.list(root.path()).unwrap();
        assert_eq!(
            names,
            BTreeSet::from([OsString::from("a"), OsString::from("b")])
        );
    }

    #[test]
    fn test_write_and_sync_file() {
        let root = tempdir().unwrap();
        let path = root.path().join("out");
        let mut file = FS.open_file(&path).unwrap();
        FS.write(&mut file, b"hello ").unwrap();
        FS.write(&mut file, b"world").unwrap();
        FS.sync_file(&file).unwrap();
        drop(file);
        assert_eq!(fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn test_open_file_truncates() {
        let root = tempdir().unwrap();
        let path = root.path().join("out");
        fs::write(&path, b"previous contents").unwrap();
        let file = FS.open_file(&path).unwrap();
        drop(file);
        assert_eq!(fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn test_sync_dir_after_creation() {
        let root = tempdir().unwrap();
        let dir = FS.open_directory(root.path()).unwrap();
        fs::write(root.path().join("child"), b"x").unwrap();
        FS.sync_dir(&dir).unwrap();
    }

    #[test]
    fn test_create_temp_file_and_dir_exist() {
        let file = FS.create_temp_file().unwrap();
        let dir = FS.create_temp_dir().unwrap();
        assert!(file.is_file());
        assert!(dir.is_dir());
        fs::remove_file(&file).unwrap();
        fs::remove_dir(&dir).unwrap();
    }

    #[test]
    fn test_delete_if_exists_is_silent_on_missing() {
        let root = tempdir().unwrap();
        FS.delete_if_exists(&root.path().join("absent")).unwrap();

        let file = root.path().join("present");
        fs::write(&file, b"x").unwrap();
        FS.delete_if_exists(&file).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_move_atomically_moves_entries() {
        let root = tempdir().unwrap();
        fs::create_dir(root.path().join("tree")).unwrap();
        fs::write(root.path().join("tree").join("leaf"), b"x").unwrap();
        FS.move_atomically(&root.path().join("tree"), &root.path().join("moved"))
            .unwrap();
        assert!(!root.path().join("tree").exists());
        assert_eq!(fs::read(root.path().join("moved").join("leaf")).unwrap(), b"x");
    }
}
