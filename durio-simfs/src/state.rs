//! Inode arena and point-in-time snapshots.
//!
//! Every inode keeps two shadows of its state: the *volatile* shadow that
//! all mutating operations touch, and the *durable* shadow that only sync
//! steps promote into. A simulated crash replaces every volatile shadow
//! with its durable counterpart.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Component, Path};

pub(crate) type Ino = usize;

pub(crate) const ROOT: Ino = 0;

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Dir(DirNode),
    File(FileNode),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DirNode {
    pub durable: BTreeMap<OsString, Ino>,
    pub volatile: BTreeMap<OsString, Ino>,
}

impl DirNode {
    pub fn in_sync(&self) -> bool {
        self.durable == self.volatile
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FileNode {
    pub durable: Vec<u8>,
    pub volatile: Vec<u8>,
}

impl FileNode {
    pub fn in_sync(&self) -> bool {
        self.durable == self.volatile
    }
}

/// The arena as it would look after a crash: all unflushed changes lost.
/// Directory entries keep naming inodes by index, so no fixup pass is
/// needed after the per-inode reset.
pub(crate) fn crash_nodes(nodes: &[Node]) -> Vec<Node> {
    nodes
        .iter()
        .map(|node| match node {
            Node::Dir(d) => Node::Dir(DirNode {
                durable: d.durable.clone(),
                volatile: d.durable.clone(),
            }),
            Node::File(f) => Node::File(FileNode {
                durable: f.durable.clone(),
                volatile: f.durable.clone(),
            }),
        })
        .collect()
}

/// Walk `path` through the volatile directory entries. Paths must be
/// absolute and contain only normal components.
pub(crate) fn resolve(nodes: &[Node], path: &Path) -> Option<Ino> {
    let mut current = ROOT;
    for component in path.components() {
        match component {
            Component::RootDir => current = ROOT,
            Component::CurDir => {}
            Component::Prefix(_) | Component::ParentDir => return None,
            Component::Normal(name) => match &nodes[current] {
                Node::Dir(d) => current = *d.volatile.get(name)?,
                Node::File(_) => return None,
            },
        }
    }
    Some(current)
}

/// Both shadows of a file's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContents {
    pub durable: Vec<u8>,
    pub volatile: Vec<u8>,
}

/// A point-in-time copy of the model filesystem, either live or post-crash.
///
/// Invariants registered with
/// [`SimFilesystem::add_invariant`](crate::SimFilesystem::add_invariant)
/// receive a `Snapshot`; tests can also take one explicitly to assert on
/// the final state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) nodes: Vec<Node>,
}

impl Snapshot {
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        resolve(&self.nodes, path.as_ref()).is_some()
    }

    pub fn is_directory(&self, path: impl AsRef<Path>) -> bool {
        resolve(&self.nodes, path.as_ref())
            .map_or(false, |ino| matches!(self.nodes[ino], Node::Dir(_)))
    }

    /// The entry names of the directory at `path`, or `None` if `path` does
    /// not name a directory.
    pub fn directory_entries(&self, path: impl AsRef<Path>) -> Option<BTreeSet<OsString>> {
        match &self.nodes[resolve(&self.nodes, path.as_ref())?] {
            Node::Dir(d) => Some(d.volatile.keys().cloned().collect()),
            Node::File(_) => None,
        }
    }

    /// Both shadows of the file at `path`, or `None` if `path` does not
    /// name a file.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<FileContents> {
        match &self.nodes[resolve(&self.nodes, path.as_ref())?] {
            Node::File(f) => Some(FileContents {
                durable: f.durable.clone(),
                volatile: f.volatile.clone(),
            }),
            Node::Dir(_) => None,
        }
    }
}
