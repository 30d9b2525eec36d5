//! Inode representation and the inode table
//!
//! Every file, directory, and symlink is a [`Node`] owned by the
//! [`InodeTable`] arena. Directory entries are name-to-ino edges in an
//! ordered map; the `..` back-link is just another edge, so the graph
//! carries no owning cycles. Parent pointers are looked up through the
//! map, never stored as references.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::error::ErrorKind;

/// Inode number. 0 is reserved and never allocated.
pub type Ino = u64;

/// The root directory is always inode 1.
pub const ROOT_INO: Ino = 1;

/// Structural entry naming the directory itself
pub const SELF_ENTRY: &str = ".";

/// Structural entry naming the directory's parent
pub const PARENT_ENTRY: &str = "..";

/// File type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
}

/// Mutable inode attributes (POSIX-like)
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Permission bits (no type bits; the type lives on the node)
    pub perm: u32,
    /// User ID
    pub uid: u32,
    /// Group ID
    pub gid: u32,
    /// Plaintext length for regular files, 0 otherwise
    pub size: u64,
    /// Access time
    pub atime: SystemTime,
    /// Modification time
    pub mtime: SystemTime,
    /// Change time, set at creation
    pub ctime: SystemTime,
    /// Count of directory entries referencing this inode, excluding
    /// the structural `.`/`..` edges
    pub nlink: u32,
}

impl Metadata {
    fn new(perm: u32, uid: u32, gid: u32) -> Self {
        let now = SystemTime::now();
        Metadata {
            perm,
            uid,
            gid,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            nlink: 0,
        }
    }

    /// Update modification and change times
    pub fn touch(&mut self) {
        let now = SystemTime::now();
        self.mtime = now;
        self.ctime = now;
    }
}

/// A node in the filesystem graph.
///
/// `ino` and `kind` are fixed for the node's lifetime; attributes and
/// directory entries sit behind their own locks so data-path size
/// updates do not need the namespace lock held exclusively.
pub struct Node {
    ino: Ino,
    kind: FileType,
    meta: RwLock<Metadata>,
    entries: RwLock<BTreeMap<String, Ino>>,
}

impl Node {
    fn new(ino: Ino, kind: FileType, perm: u32, uid: u32, gid: u32) -> Self {
        Node {
            ino,
            kind,
            meta: RwLock::new(Metadata::new(perm, uid, gid)),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn ino(&self) -> Ino {
        self.ino
    }

    pub fn kind(&self) -> FileType {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileType::Regular
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileType::Symlink
    }

    /// Snapshot of the current attributes
    pub fn metadata(&self) -> Metadata {
        self.meta.read().clone()
    }

    /// Run `f` with mutable access to the attributes
    pub fn with_meta_mut<R>(&self, f: impl FnOnce(&mut Metadata) -> R) -> R {
        f(&mut self.meta.write())
    }

    /// Look up a child entry by name
    pub fn lookup(&self, name: &str) -> Option<Ino> {
        self.entries.read().get(name).copied()
    }

    /// The inode of the `..` entry; `None` for non-directories
    pub fn parent(&self) -> Option<Ino> {
        self.lookup(PARENT_ENTRY)
    }

    /// Insert a named entry. Fails on non-directories and on name
    /// collision (the structural entries collide like any other name).
    pub fn insert_entry(&self, name: &str, child: Ino) -> Result<(), ErrorKind> {
        if !self.is_dir() {
            return Err(ErrorKind::NotADirectory);
        }
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return Err(ErrorKind::AlreadyExists);
        }
        entries.insert(name.to_string(), child);
        Ok(())
    }

    /// Remove a named entry, returning the ino it referenced.
    pub fn remove_entry(&self, name: &str) -> Result<Ino, ErrorKind> {
        if !self.is_dir() {
            return Err(ErrorKind::NotADirectory);
        }
        self.entries
            .write()
            .remove(name)
            .ok_or(ErrorKind::NotFound)
    }

    /// Repoint the `..` entry after attaching or moving a directory.
    pub fn set_parent(&self, parent: Ino) {
        self.entries.write().insert(PARENT_ENTRY.to_string(), parent);
    }

    /// Named children in sorted order, structural entries excluded.
    pub fn children(&self) -> Vec<(String, Ino)> {
        self.entries
            .read()
            .iter()
            .filter(|(name, _)| name.as_str() != SELF_ENTRY && name.as_str() != PARENT_ENTRY)
            .map(|(name, ino)| (name.clone(), *ino))
            .collect()
    }

    /// Entry names in sorted order, structural entries excluded.
    pub fn entry_names(&self) -> Vec<String> {
        self.children().into_iter().map(|(name, _)| name).collect()
    }

    /// Whether the directory holds only its structural entries.
    pub fn is_empty_dir(&self) -> bool {
        self.entries.read().len() <= 2
    }

    fn bind_structural(&self, parent: Ino) {
        let mut entries = self.entries.write();
        entries.insert(SELF_ENTRY.to_string(), self.ino);
        entries.insert(PARENT_ENTRY.to_string(), parent);
    }
}

/// Arena owning every live node, combined with the monotonic inode
/// number allocator. Guarded as a whole by the filesystem lock.
pub struct InodeTable {
    nodes: HashMap<Ino, Arc<Node>>,
    next: Ino,
}

impl InodeTable {
    pub fn new() -> Self {
        InodeTable {
            nodes: HashMap::new(),
            next: ROOT_INO,
        }
    }

    /// Allocate the next inode number and create a node of `kind`.
    /// The node starts unlinked (`nlink == 0`).
    pub fn alloc(&mut self, kind: FileType, perm: u32, uid: u32, gid: u32) -> Arc<Node> {
        let ino = self.next;
        self.next += 1;
        let node = Arc::new(Node::new(ino, kind, perm, uid, gid));
        self.nodes.insert(ino, Arc::clone(&node));
        node
    }

    /// Allocate a directory with its structural entries bound. With no
    /// parent the directory is self-parented (the root case); callers
    /// attaching to a parent patch `..` via [`Node::set_parent`].
    pub fn alloc_dir(&mut self, perm: u32, uid: u32, gid: u32, parent: Option<Ino>) -> Arc<Node> {
        let node = self.alloc(FileType::Directory, perm, uid, gid);
        node.bind_structural(parent.unwrap_or(node.ino()));
        node
    }

    /// Undo an allocation that never became reachable. Only the most
    /// recent allocation can be rolled back; inode numbers are never
    /// reused otherwise.
    pub fn rollback(&mut self, ino: Ino) {
        if ino + 1 == self.next {
            self.nodes.remove(&ino);
            self.next = ino;
        }
    }

    pub fn get(&self, ino: Ino) -> Option<Arc<Node>> {
        self.nodes.get(&ino).cloned()
    }

    /// Drop a node from the arena once its last link is gone.
    pub fn remove(&mut self, ino: Ino) -> Option<Arc<Node>> {
        self.nodes.remove(&ino)
    }

    /// Highest inode number handed out so far.
    pub fn max_ino(&self) -> Ino {
        self.next - 1
    }

    /// Insert a named link `parent[name] -> child` and account for it
    /// in the child's link count.
    pub fn link(&self, parent: &Node, name: &str, child: Ino) -> Result<(), ErrorKind> {
        parent.insert_entry(name, child)?;
        if let Some(node) = self.get(child) {
            node.with_meta_mut(|m| m.nlink += 1);
        }
        Ok(())
    }

    /// Remove the named link and decrement the referenced node's link
    /// count, returning the ino and whether it just became unreachable.
    pub fn unlink(&self, parent: &Node, name: &str) -> Result<(Ino, bool), ErrorKind> {
        let ino = parent.remove_entry(name)?;
        let mut orphaned = false;
        if let Some(node) = self.get(ino) {
            node.with_meta_mut(|m| {
                m.nlink = m.nlink.saturating_sub(1);
                orphaned = m.nlink == 0;
            });
        }
        Ok((ino, orphaned))
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
