//! Crash-simulating model filesystem for durio.
//!
//! This crate provides:
//! - SimFilesystem: a Filesystem implementation keeping independent durable
//!   and volatile shadows for every inode
//! - Snapshot: point-in-time views of the model, live or post-crash
//! - a registered-invariant harness that re-checks every invariant after
//!   every operation and every single sync step
//!
//! The point is to drive the durable algorithms through *every legal crash
//! ordering*: mutations land in volatile state only, syncs promote pending
//! differences one at a time in a seeded random order, and a crash snapshot
//! discards everything that was never promoted. An algorithm whose sync
//! discipline is wrong fails an invariant at the exact step that exposed
//! it, reproducibly under the same seed.

pub mod sim;
pub mod state;

pub use sim::{SimDir, SimFile, SimFilesystem};
pub use state::{FileContents, Snapshot};
