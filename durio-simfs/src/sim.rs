//! The crash-simulating filesystem.

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use durio_fs::{Filesystem, FsError};

use crate::state::{crash_nodes, resolve, DirNode, FileNode, Ino, Node, Snapshot, ROOT};

/// An open handle to a model directory. Bound to the inode, not the path.
#[derive(Debug, Clone, Copy)]
pub struct SimDir {
    ino: Ino,
}

/// An open handle to a model file.
#[derive(Debug, Clone, Copy)]
pub struct SimFile {
    ino: Ino,
}

/// One pending directory difference between the shadows.
enum DirChange {
    Promote(OsString, Ino),
    Forget(OsString),
}

/// One pending file difference between the shadows.
enum FileChange {
    Fix(usize),
    Grow,
    Shrink,
}

struct Inner {
    nodes: Vec<Node>,
    rng: StdRng,
    temp_seq: u64,
}

impl Inner {
    fn dir(&self, ino: Ino) -> &DirNode {
        match &self.nodes[ino] {
            Node::Dir(d) => d,
            Node::File(_) => unreachable!("directory handle refers to a file inode"),
        }
    }

    fn dir_mut(&mut self, ino: Ino) -> &mut DirNode {
        match &mut self.nodes[ino] {
            Node::Dir(d) => d,
            Node::File(_) => unreachable!("directory handle refers to a file inode"),
        }
    }

    fn file_mut(&mut self, ino: Ino) -> &mut FileNode {
        match &mut self.nodes[ino] {
            Node::File(f) => f,
            Node::Dir(_) => unreachable!("file handle refers to a directory inode"),
        }
    }

    fn add_node(&mut self, node: Node) -> Ino {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn next_temp_name(&mut self) -> OsString {
        self.temp_seq += 1;
        OsString::from(format!("tmp{:04}", self.temp_seq))
    }
}

type InvariantFn = Box<dyn Fn(&Snapshot) -> bool + Send + Sync>;

/// A model filesystem that tracks, for every inode, independent durable and
/// volatile shadows and simulates arbitrary crash outcomes.
///
/// All mutating operations touch only the volatile shadow. `sync_dir` and
/// `sync_file` promote one pending difference at a time, in an order drawn
/// from a seeded RNG, until the shadows agree; promoting an unflushed file
/// tail first writes a random garbage byte that later steps correct, the
/// way a partially flushed page can reach disk.
///
/// Invariants registered with [`add_invariant`](Self::add_invariant) are
/// re-checked against the live state *and* against a fresh crash snapshot
/// after every operation and after every single sync step, so any
/// intermediate state that violates a crash-safety contract fails fast.
/// Violations panic with the invariant's registration index.
///
/// Cloning creates a new handle to the same underlying state. With a fixed
/// seed a run is fully deterministic: temp names come from a counter and
/// sync ordering from the seeded RNG.
#[derive(Clone)]
pub struct SimFilesystem {
    inner: Arc<Mutex<Inner>>,
    invariants: Arc<Mutex<Vec<InvariantFn>>>,
}

impl SimFilesystem {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                nodes: vec![Node::Dir(DirNode::default())],
                rng: StdRng::seed_from_u64(seed),
                temp_seq: 0,
            })),
            invariants: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register an invariant over snapshots of the filesystem and check it
    /// immediately.
    pub fn add_invariant(&self, invariant: impl Fn(&Snapshot) -> bool + Send + Sync + 'static) {
        self.invariants.lock().unwrap().push(Box::new(invariant));
        self.check_invariants();
    }

    /// A snapshot of the live state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            nodes: self.inner.lock().unwrap().nodes.clone(),
        }
    }

    /// A snapshot of the state after a simulated crash: every inode's
    /// volatile shadow reset to its durable shadow.
    pub fn crash(&self) -> Snapshot {
        Snapshot {
            nodes: crash_nodes(&self.inner.lock().unwrap().nodes),
        }
    }

    fn check_invariants(&self) {
        let (live, crashed) = {
            let inner = self.inner.lock().unwrap();
            (
                Snapshot {
                    nodes: inner.nodes.clone(),
                },
                Snapshot {
                    nodes: crash_nodes(&inner.nodes),
                },
            )
        };
        let invariants = self.invariants.lock().unwrap();
        for (index, invariant) in invariants.iter().enumerate() {
            assert!(
                invariant(&live),
                "invariant {index} does not hold in the live state"
            );
            assert!(
                invariant(&crashed),
                "invariant {index} does not hold after a simulated crash"
            );
        }
    }

    fn resolve_checked(&self, path: &Path) -> Result<Ino, FsError> {
        resolve(&self.inner.lock().unwrap().nodes, path)
            .ok_or_else(|| FsError::NotFound(path.to_path_buf()))
    }
}

fn not_a_directory(path: &Path) -> FsError {
    FsError::Io(io::Error::new(
        io::ErrorKind::NotADirectory,
        format!("not a directory: {}", path.display()),
    ))
}

/// Apply one randomly chosen pending change of a directory.
fn sync_one_dir_change(dir: &mut DirNode, rng: &mut StdRng) {
    let mut changes = Vec::new();
    for (name, &ino) in &dir.volatile {
        if dir.durable.get(name) != Some(&ino) {
            changes.push(DirChange::Promote(name.clone(), ino));
        }
    }
    for name in dir.durable.keys() {
        if !dir.volatile.contains_key(name) {
            changes.push(DirChange::Forget(name.clone()));
        }
    }
    match changes.swap_remove(rng.gen_range(0..changes.len())) {
        DirChange::Promote(name, ino) => {
            dir.durable.insert(name, ino);
        }
        DirChange::Forget(name) => {
            dir.durable.remove(&name);
        }
    }
}

/// Apply one randomly chosen pending change of a file.
fn sync_one_file_change(file: &mut FileNode, rng: &mut StdRng) {
    let mut changes = Vec::new();
    let shared = file.durable.len().min(file.volatile.len());
    for i in 0..shared {
        if file.durable[i] != file.volatile[i] {
            changes.push(FileChange::Fix(i));
        }
    }
    if file.durable.len() < file.volatile.len() {
        changes.push(FileChange::Grow);
    } else if file.durable.len() > file.volatile.len() {
        changes.push(FileChange::Shrink);
    }
    match changes.swap_remove(rng.gen_range(0..changes.len())) {
        FileChange::Fix(i) => file.durable[i] = file.volatile[i],
        // An unflushed tail can reach disk as garbage before the real
        // bytes do; later steps overwrite it.
        FileChange::Grow => {
            let garbage: u8 = rng.gen();
            file.durable.push(garbage);
        }
        FileChange::Shrink => {
            file.durable.pop();
        }
    }
}

impl Filesystem for SimFilesystem {
    type Dir = SimDir;
    type File = SimFile;

    fn create_temp_dir(&self) -> Result<PathBuf, FsError> {
        let path = {
            let mut inner = self.inner.lock().unwrap();
            let name = inner.next_temp_name();
            let ino = inner.add_node(Node::Dir(DirNode::default()));
            inner.dir_mut(ROOT).volatile.insert(name.clone(), ino);
            Path::new("/").join(name)
        };
        self.check_invariants();
        Ok(path)
    }

    fn create_temp_file(&self) -> Result<PathBuf, FsError> {
        let path = {
            let mut inner = self.inner.lock().unwrap();
            let name = inner.next_temp_name();
            let ino = inner.add_node(Node::File(FileNode::default()));
            inner.dir_mut(ROOT).volatile.insert(name.clone(), ino);
            Path::new("/").join(name)
        };
        self.check_invariants();
        Ok(path)
    }

    fn open_directory(&self, path: &Path) -> Result<SimDir, FsError> {
        let ino = self.resolve_checked(path)?;
        match self.inner.lock().unwrap().nodes[ino] {
            Node::Dir(_) => Ok(SimDir { ino }),
            Node::File(_) => Err(not_a_directory(path)),
        }
    }

    fn list(&self, path: &Path) -> Result<BTreeSet<OsString>, FsError> {
        let ino = self.resolve_checked(path)?;
        match &self.inner.lock().unwrap().nodes[ino] {
            Node::Dir(d) => Ok(d.volatile.keys().cloned().collect()),
            Node::File(_) => Err(not_a_directory(path)),
        }
    }

    fn is_readable_directory(&self, parent: &SimDir, name: &OsStr) -> Result<bool, FsError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .dir(parent.ino)
            .volatile
            .get(name)
            .map_or(false, |&ino| matches!(inner.nodes[ino], Node::Dir(_))))
    }

    fn mkdir(&self, parent: &SimDir, name: &OsStr) -> Result<(), FsError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.dir(parent.ino).volatile.contains_key(name) {
                return Err(FsError::AlreadyExists(PathBuf::from(name)));
            }
            let ino = inner.add_node(Node::Dir(DirNode::default()));
            inner
                .dir_mut(parent.ino)
                .volatile
                .insert(name.to_os_string(), ino);
        }
        self.check_invariants();
        Ok(())
    }

    fn unlink(&self, parent: &SimDir, name: &OsStr) -> Result<(), FsError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let ino = match inner.dir(parent.ino).volatile.get(name) {
                Some(&ino) => ino,
                None => return Err(FsError::NotFound(PathBuf::from(name))),
            };
            if let Node::Dir(d) = &inner.nodes[ino] {
                if !d.volatile.is_empty() {
                    return Err(FsError::NotEmpty(PathBuf::from(name)));
                }
            }
            inner.dir_mut(parent.ino).volatile.remove(name);
        }
        self.check_invariants();
        Ok(())
    }

    fn rename(
        &self,
        source_parent: &SimDir,
        source_name: &OsStr,
        target_parent: &SimDir,
        target_name: &OsStr,
    ) -> Result<(), FsError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let moved = match inner.dir(source_parent.ino).volatile.get(source_name) {
                Some(&ino) => ino,
                None => return Err(FsError::NotFound(PathBuf::from(source_name))),
            };
            if let Some(&existing) = inner.dir(target_parent.ino).volatile.get(target_name) {
                if matches!(inner.nodes[existing], Node::Dir(_)) {
                    return Err(FsError::IsDirectory(PathBuf::from(target_name)));
                }
            }
            inner.dir_mut(source_parent.ino).volatile.remove(source_name);
            inner
                .dir_mut(target_parent.ino)
                .volatile
                .insert(target_name.to_os_string(), moved);
        }
        self.check_invariants();
        Ok(())
    }

    fn sync_dir(&self, dir: &SimDir) -> Result<(), FsError> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                let Inner { nodes, rng, .. } = &mut *inner;
                let node = match &mut nodes[dir.ino] {
                    Node::Dir(d) => d,
                    Node::File(_) => unreachable!("directory handle refers to a file inode"),
                };
                if node.in_sync() {
                    return Ok(());
                }
                sync_one_dir_change(node, rng);
            }
            self.check_invariants();
        }
    }

    fn open_file(&self, path: &Path) -> Result<SimFile, FsError> {
        let ino = self.resolve_checked(path)?;
        {
            let mut inner = self.inner.lock().unwrap();
            match &mut inner.nodes[ino] {
                Node::File(f) => f.volatile.clear(),
                Node::Dir(_) => return Err(FsError::IsDirectory(path.to_path_buf())),
            }
        }
        self.check_invariants();
        Ok(SimFile { ino })
    }

    fn write(&self, file: &mut SimFile, data: &[u8]) -> Result<(), FsError> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.file_mut(file.ino).volatile.extend_from_slice(data);
        }
        self.check_invariants();
        Ok(())
    }

    fn sync_file(&self, file: &SimFile) -> Result<(), FsError> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                let Inner { nodes, rng, .. } = &mut *inner;
                let node = match &mut nodes[file.ino] {
                    Node::File(f) => f,
                    Node::Dir(_) => unreachable!("file handle refers to a directory inode"),
                };
                if node.in_sync() {
                    return Ok(());
                }
                sync_one_file_change(node, rng);
            }
            self.check_invariants();
        }
    }
}
