//! The filesystem façade
//!
//! [`SecureFs`] owns the inode table, the sealed payload store, the
//! symlink table, and the working directory, and mediates every
//! externally visible operation through one reader-writer lock.
//! Structural mutations hold it exclusively; read-only metadata
//! operations hold it shared; data operations hold it shared and take
//! the per-file lock on the sealed record they touch.
//!
//! Lock order is fixed: filesystem lock, then per-file record lock,
//! then per-node metadata lock. No path acquires them in any other
//! order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::FsConfig;
use crate::crypto::KeyVault;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::flags::{Access, OpenFlags};
use crate::fs::handle::File;
use crate::fs::info::FileInfo;
use crate::fs::store::PayloadStore;
use crate::metadata::{FileType, Ino, InodeTable, Node, ROOT_INO};
use crate::path;

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) struct FsState {
    pub(crate) table: InodeTable,
    pub(crate) cwd: String,
    pub(crate) cwd_ino: Ino,
    pub(crate) symlinks: HashMap<Ino, String>,
    pub(crate) store: PayloadStore,
}

impl FsState {
    fn node(&self, ino: Ino) -> Result<Arc<Node>, ErrorKind> {
        self.table.get(ino).ok_or(ErrorKind::NotFound)
    }

    /// Absolute, lexically cleaned form of `path` against the cwd.
    pub(crate) fn absolute(&self, path: &str) -> String {
        if path::is_abs(path) {
            path::clean(path)
        } else {
            path::join(&self.cwd, path)
        }
    }

    /// Walk `path` segment by segment from `start`. Symlinks are not
    /// followed; the final inode is returned as resolved.
    fn resolve_at(&self, start: Ino, path: &str) -> Result<Arc<Node>, ErrorKind> {
        let mut cur = self.node(start)?;
        for seg in path.split(path::SEPARATOR).filter(|s| !s.is_empty()) {
            if !cur.is_dir() {
                return Err(ErrorKind::NotADirectory);
            }
            let next = cur.lookup(seg).ok_or(ErrorKind::NotFound)?;
            cur = self.node(next)?;
        }
        Ok(cur)
    }

    /// Resolve the parent directory of a cleaned absolute path,
    /// returning it with the final path component.
    fn resolve_parent_of(&self, abs: &str) -> Result<(Arc<Node>, String), ErrorKind> {
        let (dir_part, name) = path::split(abs);
        let parent = self.resolve_at(ROOT_INO, &path::clean(dir_part))?;
        if !parent.is_dir() {
            return Err(ErrorKind::NotADirectory);
        }
        Ok((parent, name.to_string()))
    }

    /// Resolve `abs`, following trailing symlinks up to `hops` times.
    ///
    /// Yields the final path together with its node, or `None` when
    /// the chain ends at a path that does not exist (the caller
    /// decides whether that is an error or a creation site). Exceeding
    /// the hop bound reports a loop.
    fn resolve_follow(
        &self,
        abs: &str,
        hops: u32,
    ) -> Result<(String, Option<Arc<Node>>), ErrorKind> {
        let mut current = path::clean(abs);
        for _ in 0..=hops {
            match self.resolve_at(ROOT_INO, &current) {
                Ok(node) if node.is_symlink() => {
                    let target = self
                        .symlinks
                        .get(&node.ino())
                        .cloned()
                        .ok_or(ErrorKind::Internal)?;
                    current = if path::is_abs(&target) {
                        path::clean(&target)
                    } else {
                        path::join(&path::dir(&current), &target)
                    };
                }
                Ok(node) => return Ok((current, Some(node))),
                Err(ErrorKind::NotFound) => return Ok((current, None)),
                Err(kind) => return Err(kind),
            }
        }
        Err(ErrorKind::FilesystemLoop)
    }

    /// Release everything owned by an inode whose last link is gone.
    fn reap(&mut self, ino: Ino) {
        self.table.remove(ino);
        self.store.unregister(ino);
        self.symlinks.remove(&ino);
    }
}

pub(crate) struct FsInner {
    pub(crate) instance: u64,
    pub(crate) config: FsConfig,
    pub(crate) vault: KeyVault,
    pub(crate) state: RwLock<FsState>,
}

/// An in-memory filesystem whose regular-file payloads are encrypted
/// at rest with per-file sealed keys.
///
/// Cloning is cheap and shares the underlying filesystem; handles
/// returned by [`open_file`](SecureFs::open_file) keep it alive.
#[derive(Clone)]
pub struct SecureFs {
    pub(crate) inner: Arc<FsInner>,
}

impl SecureFs {
    /// Create an empty filesystem with default configuration.
    pub fn new() -> Self {
        Self::build(FsConfig::default())
    }

    /// Create an empty filesystem with the given configuration.
    pub fn with_config(config: FsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: FsConfig) -> Self {
        let mut table = InodeTable::new();
        let root = table.alloc_dir(0o755, config.uid, config.gid, None);
        debug_assert_eq!(root.ino(), ROOT_INO);

        let state = FsState {
            table,
            cwd: "/".to_string(),
            cwd_ino: ROOT_INO,
            symlinks: HashMap::new(),
            store: PayloadStore::new(),
        };

        SecureFs {
            inner: Arc::new(FsInner {
                instance: INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed),
                config,
                vault: KeyVault::new(),
                state: RwLock::new(state),
            }),
        }
    }

    pub fn config(&self) -> &FsConfig {
        &self.inner.config
    }

    /// Path separator of the virtual namespace
    pub fn separator(&self) -> char {
        path::SEPARATOR
    }

    pub fn list_separator(&self) -> char {
        path::LIST_SEPARATOR
    }

    /// Conventional temporary directory inside the namespace
    pub fn tempdir(&self) -> String {
        self.inner.config.tempdir.clone()
    }

    fn hop_limit(&self) -> u32 {
        self.inner.config.symlink_hop_limit
    }

    fn info(&self, name: &str, node: &Node) -> FileInfo {
        FileInfo::from_node(name, node, self.inner.instance)
    }

    /// Absolute, lexically cleaned form of `path` against the current
    /// working directory.
    pub fn abs(&self, path: &str) -> Result<String> {
        Ok(self.inner.state.read().absolute(path))
    }

    /// Current working directory
    pub fn getwd(&self) -> Result<String> {
        Ok(self.inner.state.read().cwd.clone())
    }

    /// Change the working directory.
    pub fn chdir(&self, dir: &str) -> Result<()> {
        let mut state = self.inner.state.write();
        let abs = state.absolute(dir);
        let node = state
            .resolve_at(ROOT_INO, &abs)
            .map_err(|kind| Error::new("chdir", dir, kind))?;
        if !node.is_dir() {
            return Err(Error::new("chdir", dir, ErrorKind::NotADirectory));
        }
        debug!("chdir({:?})", abs);
        state.cwd = abs;
        state.cwd_ino = node.ino();
        Ok(())
    }

    /// Open for reading only.
    pub fn open(&self, name: &str) -> Result<File> {
        self.open_file(name, OpenFlags::READ_ONLY, 0)
    }

    /// Create or truncate a file open for reading and writing.
    pub fn create(&self, name: &str) -> Result<File> {
        self.open_file(
            name,
            OpenFlags::CREATE | OpenFlags::READ_WRITE | OpenFlags::TRUNCATE,
            0o644,
        )
    }

    /// The general open entry point.
    ///
    /// Trailing symlinks are followed. A missing file is created when
    /// `CREATE` is set, receiving `perm` masked by the filesystem
    /// umask; `EXCLUSIVE` turns an existing file into an error;
    /// `TRUNCATE` drops the existing ciphertext and key. Directories
    /// open read-only for listing.
    pub fn open_file(&self, name: &str, flags: OpenFlags, perm: u32) -> Result<File> {
        let access = flags
            .access()
            .map_err(|kind| Error::new("open", name, kind))?;
        debug!("open({:?}, flags={:?})", name, flags);

        let mut state = self.inner.state.write();
        let abs = state.absolute(name);
        let (target_abs, existing) = state
            .resolve_follow(&abs, self.hop_limit())
            .map_err(|kind| Error::new("open", name, kind))?;

        let node = match existing {
            Some(node) => {
                if flags.contains(OpenFlags::CREATE) && flags.contains(OpenFlags::EXCLUSIVE) {
                    return Err(Error::new("open", name, ErrorKind::AlreadyExists));
                }
                if node.is_dir()
                    && (access != Access::Read || flags.contains(OpenFlags::TRUNCATE))
                {
                    return Err(Error::new("open", name, ErrorKind::IsADirectory));
                }
                let meta = node.metadata();
                let denied = match access {
                    Access::Read => meta.perm & 0o444 == 0,
                    Access::Write => meta.perm & 0o222 == 0,
                    Access::ReadWrite => meta.perm & 0o666 == 0,
                };
                if denied {
                    return Err(Error::new("open", name, ErrorKind::PermissionDenied));
                }
                if flags.contains(OpenFlags::TRUNCATE) {
                    if let Some(record) = state.store.get(node.ino()) {
                        record.clear();
                    }
                    node.with_meta_mut(|m| {
                        m.size = 0;
                        m.touch();
                    });
                }
                node
            }
            None => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(Error::new("open", name, ErrorKind::NotFound));
                }
                let (parent, base) = state
                    .resolve_parent_of(&target_abs)
                    .map_err(|kind| Error::new("open", name, kind))?;
                let config = &self.inner.config;
                let node = state.table.alloc(
                    FileType::Regular,
                    perm & 0o777 & !config.umask,
                    config.uid,
                    config.gid,
                );
                if let Err(kind) = state.table.link(&parent, &base, node.ino()) {
                    state.table.rollback(node.ino());
                    return Err(Error::new("open", name, kind));
                }
                state.store.register(node.ino(), FileType::Regular);
                node
            }
        };

        let data = state.store.get(node.ino());
        let offset = if flags.contains(OpenFlags::APPEND) {
            node.metadata().size
        } else {
            0
        };
        drop(state);

        Ok(File::new(
            Arc::clone(&self.inner),
            name.to_string(),
            node,
            data,
            flags,
            access,
            offset,
        ))
    }

    /// Set the plaintext length of the named file.
    ///
    /// Shrinking slices the plaintext; growing zero-fills the tail.
    /// Either way the content is re-encrypted under a fresh key. A
    /// size equal to the current size leaves the record untouched.
    pub fn truncate(&self, name: &str, size: u64) -> Result<()> {
        let state = self.inner.state.read();
        let abs = state.absolute(name);
        let (_, node) = state
            .resolve_follow(&abs, self.hop_limit())
            .map_err(|kind| Error::new("truncate", name, kind))?;
        let node = node.ok_or_else(|| Error::new("truncate", name, ErrorKind::NotFound))?;
        if node.is_dir() {
            return Err(Error::new("truncate", name, ErrorKind::IsADirectory));
        }
        let record = state
            .store
            .get(node.ino())
            .ok_or_else(|| Error::new("truncate", name, ErrorKind::Internal))?;

        let new_len = record
            .update(&self.inner.vault, |plain| {
                if plain.len() as u64 == size {
                    return false;
                }
                plain.resize(size as usize, 0);
                true
            })
            .map_err(|kind| Error::new("truncate", name, kind))?;

        node.with_meta_mut(|m| {
            if m.size != new_len {
                m.size = new_len;
                m.touch();
            }
        });
        Ok(())
    }

    /// Create a single directory. Every ancestor must already exist.
    pub fn mkdir(&self, name: &str, perm: u32) -> Result<()> {
        let mut state = self.inner.state.write();
        let abs = state.absolute(name);
        if state.resolve_at(ROOT_INO, &abs).is_ok() {
            return Err(Error::new("mkdir", name, ErrorKind::AlreadyExists));
        }
        let (parent, base) = state
            .resolve_parent_of(&abs)
            .map_err(|kind| Error::new("mkdir", name, kind))?;

        let config = &self.inner.config;
        let node = state.table.alloc_dir(
            perm & 0o777 & !config.umask,
            config.uid,
            config.gid,
            Some(parent.ino()),
        );
        if let Err(kind) = state.table.link(&parent, &base, node.ino()) {
            state.table.rollback(node.ino());
            return Err(Error::new("mkdir", name, kind));
        }
        state.store.register(node.ino(), FileType::Directory);
        debug!("mkdir({:?})", name);
        Ok(())
    }

    /// Create a directory and all missing ancestors. Existing levels
    /// are skipped; the first error other than "already exists" is
    /// returned.
    pub fn mkdir_all(&self, name: &str, perm: u32) -> Result<()> {
        let abs = self.inner.state.read().absolute(name);
        let mut prefix = String::from("/");
        for seg in abs.split(path::SEPARATOR).filter(|s| !s.is_empty()) {
            prefix = path::join(&prefix, seg);
            if let Err(err) = self.mkdir(&prefix, perm) {
                if !err.is_already_exists() {
                    return Err(err.with_op("mkdir_all"));
                }
            }
        }
        Ok(())
    }

    /// Unlink a single entry. Directories must be empty.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.inner.state.write();
        let abs = state.absolute(name);
        if abs == "/" {
            return Err(Error::new("remove", name, ErrorKind::InvalidInput));
        }
        let node = state
            .resolve_at(ROOT_INO, &abs)
            .map_err(|kind| Error::new("remove", name, kind))?;
        if node.is_dir() && !node.is_empty_dir() {
            return Err(Error::new("remove", name, ErrorKind::DirectoryNotEmpty));
        }
        let (parent, base) = state
            .resolve_parent_of(&abs)
            .map_err(|kind| Error::new("remove", name, kind))?;
        let (ino, orphaned) = state
            .table
            .unlink(&parent, &base)
            .map_err(|kind| Error::new("remove", name, kind))?;
        if orphaned {
            state.reap(ino);
        }
        debug!("remove({:?})", name);
        Ok(())
    }

    /// Unlink a subtree in post-order, then the top entry itself.
    /// A missing path is not an error.
    pub fn remove_all(&self, name: &str) -> Result<()> {
        let mut state = self.inner.state.write();
        let abs = state.absolute(name);
        if abs == "/" {
            return Err(Error::new("remove_all", name, ErrorKind::InvalidInput));
        }
        let node = match state.resolve_at(ROOT_INO, &abs) {
            Ok(node) => node,
            Err(ErrorKind::NotFound) => return Ok(()),
            Err(kind) => return Err(Error::new("remove_all", name, kind)),
        };
        let (parent, base) = state
            .resolve_parent_of(&abs)
            .map_err(|kind| Error::new("remove_all", name, kind))?;

        Self::remove_tree(&mut state, &node);
        let (ino, orphaned) = state
            .table
            .unlink(&parent, &base)
            .map_err(|kind| Error::new("remove_all", name, kind))?;
        if orphaned {
            state.reap(ino);
        }
        debug!("remove_all({:?})", name);
        Ok(())
    }

    fn remove_tree(state: &mut FsState, node: &Arc<Node>) {
        if !node.is_dir() {
            return;
        }
        for (name, ino) in node.children() {
            if let Some(child) = state.table.get(ino) {
                Self::remove_tree(state, &child);
            }
            if let Ok((removed, orphaned)) = state.table.unlink(node, &name) {
                if orphaned {
                    state.reap(removed);
                }
            }
        }
    }

    /// Move `oldpath` to `newpath`, atomically with respect to every
    /// other operation on this filesystem.
    ///
    /// An existing `newpath` is replaced when the types agree and a
    /// directory target is empty. The root cannot be renamed, and a
    /// directory cannot be moved into its own descendant.
    pub fn rename(&self, oldpath: &str, newpath: &str) -> Result<()> {
        let fail = |kind| Error::link("rename", oldpath, newpath, kind);

        let mut state = self.inner.state.write();
        let old_abs = state.absolute(oldpath);
        let new_abs = state.absolute(newpath);
        if old_abs == "/" || new_abs == "/" {
            return Err(fail(ErrorKind::InvalidInput));
        }
        if new_abs.starts_with(&format!("{old_abs}/")) {
            return Err(fail(ErrorKind::InvalidInput));
        }

        let src = state.resolve_at(ROOT_INO, &old_abs).map_err(&fail)?;
        if new_abs == old_abs {
            return Ok(());
        }
        let (old_parent, old_base) = state.resolve_parent_of(&old_abs).map_err(&fail)?;
        let (new_parent, new_base) = state.resolve_parent_of(&new_abs).map_err(&fail)?;

        if let Some(existing_ino) = new_parent.lookup(&new_base) {
            if existing_ino == src.ino() {
                return Ok(());
            }
            let existing = state.node(existing_ino).map_err(&fail)?;
            if existing.is_dir() {
                if !src.is_dir() {
                    return Err(fail(ErrorKind::IsADirectory));
                }
                if !existing.is_empty_dir() {
                    return Err(fail(ErrorKind::DirectoryNotEmpty));
                }
            } else if src.is_dir() {
                return Err(fail(ErrorKind::NotADirectory));
            }
            let (ino, orphaned) = state.table.unlink(&new_parent, &new_base).map_err(&fail)?;
            if orphaned {
                state.reap(ino);
            }
        }

        // Moving an entry keeps the source's link count level, so the
        // edges are edited directly instead of via unlink+link.
        old_parent.remove_entry(&old_base).map_err(&fail)?;
        new_parent
            .insert_entry(&new_base, src.ino())
            .map_err(&fail)?;
        if src.is_dir() && old_parent.ino() != new_parent.ino() {
            src.set_parent(new_parent.ino());
        }
        src.with_meta_mut(|m| m.ctime = SystemTime::now());
        debug!("rename({:?}, {:?})", oldpath, newpath);
        Ok(())
    }

    /// Change permission bits. Follows a trailing symlink.
    pub fn chmod(&self, name: &str, perm: u32) -> Result<()> {
        let state = self.inner.state.write();
        let node = self.resolve_followed(&state, "chmod", name)?;
        node.with_meta_mut(|m| {
            m.perm = perm & 0o7777;
            m.ctime = SystemTime::now();
        });
        Ok(())
    }

    /// Change owner and group. Follows a trailing symlink.
    pub fn chown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let state = self.inner.state.write();
        let node = self.resolve_followed(&state, "chown", name)?;
        node.with_meta_mut(|m| {
            m.uid = uid;
            m.gid = gid;
            m.ctime = SystemTime::now();
        });
        Ok(())
    }

    /// Change owner and group of the path itself, without following a
    /// trailing symlink.
    pub fn lchown(&self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let state = self.inner.state.write();
        let abs = state.absolute(name);
        let node = state
            .resolve_at(ROOT_INO, &abs)
            .map_err(|kind| Error::new("lchown", name, kind))?;
        node.with_meta_mut(|m| {
            m.uid = uid;
            m.gid = gid;
            m.ctime = SystemTime::now();
        });
        Ok(())
    }

    /// Set access and modification times. Follows a trailing symlink.
    pub fn chtimes(&self, name: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let state = self.inner.state.write();
        let node = self.resolve_followed(&state, "chtimes", name)?;
        node.with_meta_mut(|m| {
            m.atime = atime;
            m.mtime = mtime;
        });
        Ok(())
    }

    fn resolve_followed(
        &self,
        state: &FsState,
        op: &'static str,
        name: &str,
    ) -> Result<Arc<Node>> {
        let abs = state.absolute(name);
        let (_, node) = state
            .resolve_follow(&abs, self.hop_limit())
            .map_err(|kind| Error::new(op, name, kind))?;
        node.ok_or_else(|| Error::new(op, name, ErrorKind::NotFound))
    }

    /// Stat the named path, following symlinks until a non-symlink is
    /// reached or the hop bound trips.
    pub fn stat(&self, name: &str) -> Result<FileInfo> {
        let state = self.inner.state.read();
        let abs = state.absolute(name);
        let (_, node) = state
            .resolve_follow(&abs, self.hop_limit())
            .map_err(|kind| Error::new("stat", name, kind))?;
        let node = node.ok_or_else(|| Error::new("stat", name, ErrorKind::NotFound))?;
        Ok(self.info(path::base(&abs), &node))
    }

    /// Stat the named path without following a trailing symlink.
    pub fn lstat(&self, name: &str) -> Result<FileInfo> {
        let state = self.inner.state.read();
        let abs = state.absolute(name);
        let node = state
            .resolve_at(ROOT_INO, &abs)
            .map_err(|kind| Error::new("lstat", name, kind))?;
        Ok(self.info(path::base(&abs), &node))
    }

    /// The stored target of a symlink, verbatim.
    pub fn readlink(&self, name: &str) -> Result<String> {
        let state = self.inner.state.read();
        let abs = state.absolute(name);
        let node = state
            .resolve_at(ROOT_INO, &abs)
            .map_err(|kind| Error::new("readlink", name, kind))?;
        if !node.is_symlink() {
            return Err(Error::new("readlink", name, ErrorKind::NotASymlink));
        }
        state
            .symlinks
            .get(&node.ino())
            .cloned()
            .ok_or_else(|| Error::new("readlink", name, ErrorKind::Internal))
    }

    /// Record a symlink at `linkpath` pointing at `target`.
    ///
    /// The target is stored verbatim and never validated. An existing
    /// symlink at `linkpath` has its target replaced; any other
    /// existing entry is a collision.
    pub fn symlink(&self, target: &str, linkpath: &str) -> Result<()> {
        let mut state = self.inner.state.write();
        let abs = state.absolute(linkpath);
        if let Ok(existing) = state.resolve_at(ROOT_INO, &abs) {
            if !existing.is_symlink() {
                return Err(Error::new("symlink", linkpath, ErrorKind::AlreadyExists));
            }
            state.symlinks.insert(existing.ino(), target.to_string());
            return Ok(());
        }
        let (parent, base) = state
            .resolve_parent_of(&abs)
            .map_err(|kind| Error::new("symlink", linkpath, kind))?;

        let config = &self.inner.config;
        let node = state
            .table
            .alloc(FileType::Symlink, 0o777, config.uid, config.gid);
        if let Err(kind) = state.table.link(&parent, &base, node.ino()) {
            state.table.rollback(node.ino());
            return Err(Error::new("symlink", linkpath, kind));
        }
        state.store.register(node.ino(), FileType::Symlink);
        state.symlinks.insert(node.ino(), target.to_string());
        debug!("symlink({:?} -> {:?})", linkpath, target);
        Ok(())
    }

    /// Depth-first pre-order traversal rooted at `root`.
    ///
    /// Directory children are visited in ascending lexicographic
    /// order; `.` and `..` are skipped. The visitor's first error
    /// terminates the walk. The filesystem lock is not held while the
    /// visitor runs, so visitors may call back into the filesystem.
    pub fn walk<F>(&self, root: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &FileInfo) -> Result<()>,
    {
        let mut stack = vec![self.abs(root)?];
        while let Some(current) = stack.pop() {
            let info = self.stat(&current)?;
            if info.is_dir() {
                let mut names = {
                    let state = self.inner.state.read();
                    let (_, node) = state
                        .resolve_follow(&current, self.hop_limit())
                        .map_err(|kind| Error::new("walk", &current, kind))?;
                    match node {
                        Some(node) => node.entry_names(),
                        None => Vec::new(),
                    }
                };
                // Descending push order makes the stack pop ascending.
                names.sort_by(|a, b| b.cmp(a));
                for name in names {
                    stack.push(path::join(&current, &name));
                }
            }
            visit(&current, &info)?;
        }
        Ok(())
    }
}

impl Default for SecureFs {
    fn default() -> Self {
        Self::new()
    }
}
