//! Output stream whose target file appears only on commit.
//!
//! Bytes are staged in a temporary file on the same filesystem interface,
//! behind an internal buffer, so the stream holds a bounded amount of
//! memory no matter how much is written. Committing flushes and syncs the
//! staging file, then renames it over the target in one atomic step.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use durio_fs::{paths, Filesystem, FsError, RealFilesystem};

use crate::ops::DurableOps;

/// Size of the internal write buffer and of the chunks used when copying
/// from a reader.
pub const BUFFER_SIZE: usize = 8 * 1024;

/// A buffered write target that creates its file atomically and durably on
/// [`commit`](AtomicDurableOutputStream::commit).
///
/// While the stream is open the target path is never touched; an external
/// observer sees the target either absent or holding the complete committed
/// bytes. Dropping the stream without committing aborts it: the target is
/// unchanged and the staging file is best-effort deleted.
///
/// `commit` consumes the stream, so committing twice or writing after a
/// commit does not compile.
///
/// ```no_run
/// use std::io::Write;
/// use std::path::Path;
///
/// # fn main() -> Result<(), durio::FsError> {
/// let mut out = durio::AtomicDurableOutputStream::create(Path::new("/var/data/report"))?;
/// out.write_all(b"contents")?;
/// out.commit()?;
/// # Ok(())
/// # }
/// ```
pub struct AtomicDurableOutputStream<F: Filesystem = RealFilesystem> {
    ops: DurableOps<F>,
    target: PathBuf,
    tmp: PathBuf,
    file: Option<F::File>,
    buffer: Vec<u8>,
    committed: bool,
}

impl AtomicDurableOutputStream<RealFilesystem> {
    /// Open a stream that will create `target` on the real filesystem.
    pub fn create(target: &Path) -> Result<Self, FsError> {
        Self::create_in(DurableOps::new(RealFilesystem), target)
    }
}

impl<F: Filesystem> AtomicDurableOutputStream<F> {
    /// Open a stream that will create `target` through the given durable
    /// operations façade.
    pub fn create_in(ops: DurableOps<F>, target: &Path) -> Result<Self, FsError> {
        let target = paths::absolute(target)?;
        let tmp = ops.fs().create_temp_file()?;
        let file = match ops.fs().open_file(&tmp) {
            Ok(file) => file,
            Err(err) => {
                // Construction failed partway; release what was acquired.
                let _ = ops.fs().delete_if_exists(&tmp);
                return Err(err);
            }
        };
        Ok(Self {
            ops,
            target,
            tmp,
            file: Some(file),
            buffer: Vec::with_capacity(BUFFER_SIZE),
            committed: false,
        })
    }

    /// The file that commit will create.
    pub fn target_path(&self) -> &Path {
        &self.target
    }

    /// The staging file holding the bytes written so far. The name is not
    /// part of any contract; exposed for diagnostics.
    pub fn temp_path(&self) -> &Path {
        &self.tmp
    }

    /// Append `data` to the stream.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), FsError> {
        if self.buffer.len() + data.len() > BUFFER_SIZE && !self.buffer.is_empty() {
            self.flush_buffer()?;
        }
        if data.len() >= BUFFER_SIZE {
            self.write_through(data)
        } else {
            self.buffer.extend_from_slice(data);
            Ok(())
        }
    }

    /// Make the written bytes durable at the target path.
    ///
    /// Flushes the buffer, syncs the staging file, releases the handle, and
    /// atomically renames the staging file over the target, syncing the
    /// target's parent directory. The parent directory must already exist
    /// durably; [`DurableOps::write`] arranges that before committing.
    pub fn commit(mut self) -> Result<(), FsError> {
        self.flush_buffer()?;
        let file = self
            .file
            .take()
            .expect("stream holds its file handle until commit");
        self.ops.fs().sync_file(&file)?;
        drop(file);
        self.ops
            .move_without_promising_source_deletion(&self.tmp, &self.target)?;
        self.committed = true;
        debug!(target = %self.target.display(), "atomic durable write committed");
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<(), FsError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let file = self
            .file
            .as_mut()
            .expect("stream holds its file handle until commit");
        self.ops.fs().write(file, &self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    fn write_through(&mut self, data: &[u8]) -> Result<(), FsError> {
        let file = self
            .file
            .as_mut()
            .expect("stream holds its file handle until commit");
        self.ops.fs().write(file, data)
    }
}

impl<F: Filesystem> io::Write for AtomicDurableOutputStream<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.flush_buffer()?)
    }
}

impl<F: Filesystem> Drop for AtomicDurableOutputStream<F> {
    fn drop(&mut self) {
        self.file = None;
        if !self.committed {
            // Abort path: the target was never touched; removing the
            // staging file is best effort.
            if let Err(err) = self.ops.fs().delete_if_exists(&self.tmp) {
                warn!(
                    temp = %self.tmp.display(),
                    error = %err,
                    "failed to remove staging file"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_target_absent_until_commit() {
        let root = tempdir().unwrap();
        let target = root.path().join("out");

        let mut out = AtomicDurableOutputStream::create(&target).unwrap();
        out.write_bytes(b"some bytes").unwrap();
        assert!(!target.exists());
        out.commit().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"some bytes");
    }

    #[test]
    fn test_drop_without_commit_leaves_target_absent() {
        let root = tempdir().unwrap();
        let target = root.path().join("out");

        let mut out = AtomicDurableOutputStream::create(&target).unwrap();
        out.write_bytes(b"doomed bytes").unwrap();
        let tmp = out.temp_path().to_path_buf();
        drop(out);

        assert!(!target.exists());
        assert!(!tmp.exists());
    }

    #[test]
    fn test_commit_consumes_staging_file() {
        let root = tempdir().unwrap();
        let target = root.path().join("out");

        let mut out = AtomicDurableOutputStream::create(&target).unwrap();
        out.write_bytes(b"bytes").unwrap();
        let tmp = out.temp_path().to_path_buf();
        out.commit().unwrap();
        assert!(!tmp.exists());
    }

    #[test]
    fn test_writes_larger_than_buffer_pass_through() {
        let root = tempdir().unwrap();
        let target = root.path().join("big");
        let payload: Vec<u8> = (0..BUFFER_SIZE * 2 + 311).map(|i| (i % 251) as u8).collect();

        let mut out = AtomicDurableOutputStream::create(&target).unwrap();
        out.write_bytes(&payload[..100]).unwrap();
        out.write_bytes(&payload[100..]).unwrap();
        out.commit().unwrap();
        assert_eq!(fs::read(&target).unwrap(), payload);
    }

    #[test]
    fn test_io_write_interface() {
        let root = tempdir().unwrap();
        let target = root.path().join("out");

        let mut out = AtomicDurableOutputStream::create(&target).unwrap();
        out.write_all(b"written through std::io::Write").unwrap();
        out.flush().unwrap();
        out.commit().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"written through std::io::Write");
    }

    #[test]
    fn test_many_small_writes_preserve_order() {
        let root = tempdir().unwrap();
        let target = root.path().join("out");
        let mut expected = Vec::new();

        let mut out = AtomicDurableOutputStream::create(&target).unwrap();
        for i in 0..3000u32 {
            let piece = i.to_le_bytes();
            out.write_bytes(&piece).unwrap();
            expected.extend_from_slice(&piece);
        }
        out.commit().unwrap();
        assert_eq!(fs::read(&target).unwrap(), expected);
    }
}
