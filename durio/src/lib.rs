//! Crash-safe filesystem primitives.
//!
//! This crate provides compound filesystem operations with well-defined
//! atomicity and durability contracts on POSIX-style filesystems:
//!
//! - [`write`] / [`write_reader`]: atomic durable file creation, including
//!   missing intermediate directories
//! - [`move_entry`]: atomic durable rename
//! - [`atomically_delete`]: atomic durable deletion of a whole subtree
//! - [`create_directories`]: durable recursive directory creation
//! - [`AtomicDurableOutputStream`]: a write target whose file appears only
//!   on an explicit commit
//! - [`DirectoryModificationScope`]: scoped durability for direct changes
//!   to one directory
//!
//! *Atomic* means an operation has exactly two observable outcomes, fully
//! applied or not applied, even across crashes. *Durable* means that once
//! an operation returns, its effect survives a power loss.
//!
//! The free functions run against the real filesystem; the same algorithms
//! are available over any [`Filesystem`] implementation through
//! [`DurableOps`], which is how the crash-simulating test filesystem
//! exercises them.
//!
//! # Caveats
//!
//! Durability guarantees require a local filesystem supporting atomic
//! rename and fsync on both regular files and directories; where directory
//! fsync is unavailable, directory changes degrade to best-effort
//! durability. The filesystem is **not** a synchronization primitive: a
//! thread that observes the effect of another thread's write cannot
//! conclude the write is durable. Only the return of the call in the
//! writing thread conveys that guarantee.

pub mod ops;
pub mod scope;
pub mod stream;

pub use durio_fs::{Filesystem, FsError, RealFilesystem};
pub use ops::DurableOps;
pub use scope::DirectoryModificationScope;
pub use stream::AtomicDurableOutputStream;

use std::io::Read;
use std::path::Path;

fn real() -> DurableOps<RealFilesystem> {
    DurableOps::new(RealFilesystem)
}

/// Create every missing component of `path` as a directory, each durably.
///
/// See [`DurableOps::create_directories`].
pub fn create_directories(path: &Path) -> Result<(), FsError> {
    real().create_directories(path)
}

/// Atomically and durably delete `path` and everything below it.
///
/// See [`DurableOps::atomically_delete`].
pub fn atomically_delete(path: &Path) -> Result<(), FsError> {
    real().atomically_delete(path)
}

/// Atomically and durably rename `source` to `target`.
///
/// See [`DurableOps::move_entry`].
pub fn move_entry(source: &Path, target: &Path) -> Result<(), FsError> {
    real().move_entry(source, target)
}

/// As [`move_entry`], without promising that the source entry's removal is
/// durable.
///
/// See [`DurableOps::move_without_promising_source_deletion`].
pub fn move_without_promising_source_deletion(
    source: &Path,
    target: &Path,
) -> Result<(), FsError> {
    real().move_without_promising_source_deletion(source, target)
}

/// Write `bytes` to `path` atomically and durably, creating intermediate
/// directories as needed.
///
/// See [`DurableOps::write`].
pub fn write(path: &Path, bytes: &[u8]) -> Result<(), FsError> {
    real().write(path, bytes)
}

/// As [`write`], reading the contents from `data` in fixed-size chunks.
///
/// See [`DurableOps::write_reader`].
pub fn write_reader<R: Read>(path: &Path, data: R) -> Result<(), FsError> {
    real().write_reader(path, data)
}
