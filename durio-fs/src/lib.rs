//! Filesystem abstraction for durio.
//!
//! This crate provides:
//! - Filesystem trait: uniform low-level operations over directories and files
//! - RealFilesystem: the physical implementation backed by std::fs
//! - FsError: the error taxonomy shared by every layer
//! - paths: promotion of caller paths to absolute form
//!
//! The trait is abstract by intent: the durable algorithms in the `durio`
//! crate run unchanged against the physical filesystem and against model
//! implementations that simulate crashes (see the `durio-simfs` crate).

pub mod error;
pub mod fs;
pub mod paths;
pub mod real;

pub use error::FsError;
pub use fs::Filesystem;
pub use real::{RealDirectory, RealFile, RealFilesystem};
