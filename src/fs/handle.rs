//! Open-file handles
//!
//! A [`File`] binds an inode to its sealed record for the duration of
//! an open. Reads decrypt under the per-file shared lock; writes and
//! truncation rewrite the full plaintext under a fresh key, holding
//! the per-file lock exclusively. Plaintext only ever lives in
//! wiped-on-drop buffers scoped to a single call.

use std::io::SeekFrom;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Error, ErrorKind, Result};
use crate::fs::filesystem::FsInner;
use crate::fs::flags::{Access, OpenFlags};
use crate::fs::info::FileInfo;
use crate::fs::store::SealedFile;
use crate::metadata::Node;
use crate::path;

/// An open file (or directory) handle.
pub struct File {
    inner: Arc<FsInner>,
    name: String,
    node: Arc<Node>,
    data: Option<Arc<SealedFile>>,
    flags: OpenFlags,
    access: Access,
    offset: u64,
    dir_pos: usize,
    closed: bool,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("access", &self.access)
            .field("offset", &self.offset)
            .field("dir_pos", &self.dir_pos)
            .field("closed", &self.closed)
            .finish()
    }
}

impl File {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        inner: Arc<FsInner>,
        name: String,
        node: Arc<Node>,
        data: Option<Arc<SealedFile>>,
        flags: OpenFlags,
        access: Access,
        offset: u64,
    ) -> Self {
        File {
            inner,
            name,
            node,
            data,
            flags,
            access,
            offset,
            dir_pos: 0,
            closed: false,
        }
    }

    /// The path the handle was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_open(&self, op: &'static str) -> Result<()> {
        if self.closed {
            return Err(Error::new(op, self.name.as_str(), ErrorKind::InvalidInput));
        }
        Ok(())
    }

    fn record(&self, op: &'static str) -> Result<Arc<SealedFile>> {
        self.data
            .clone()
            .ok_or_else(|| Error::new(op, self.name.as_str(), ErrorKind::Internal))
    }

    /// Read from the current position, advancing it. Returns 0 at end
    /// of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open("read")?;
        if !self.access.readable() {
            return Err(Error::new(
                "read",
                self.name.as_str(),
                ErrorKind::PermissionDenied,
            ));
        }
        if self.node.is_dir() {
            return Err(Error::new(
                "read",
                self.name.as_str(),
                ErrorKind::IsADirectory,
            ));
        }
        let record = self.record("read")?;

        let plaintext = {
            let _fs = self.inner.state.read();
            record
                .read_plaintext(&self.inner.vault)
                .map_err(|kind| Error::new("read", self.name.as_str(), kind))?
        };

        let start = self.offset as usize;
        if start >= plaintext.len() {
            return Ok(0);
        }
        let n = (plaintext.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&plaintext[start..start + n]);
        self.offset += n as u64;
        self.node
            .with_meta_mut(|m| m.atime = SystemTime::now());
        Ok(n)
    }

    /// Write at the current position (or at end of file for append
    /// handles), advancing it. A gap left by seeking past the end is
    /// zero-filled.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_open("write")?;
        if !self.access.writable() {
            return Err(Error::new(
                "write",
                self.name.as_str(),
                ErrorKind::PermissionDenied,
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let record = self.record("write")?;
        let append = self.flags.contains(OpenFlags::APPEND);
        let mut write_at = self.offset as usize;

        let new_len = {
            let _fs = self.inner.state.read();
            record
                .update(&self.inner.vault, |plain| {
                    if append {
                        write_at = plain.len();
                    }
                    let end = write_at + buf.len();
                    if plain.len() < end {
                        plain.resize(end, 0);
                    }
                    plain[write_at..end].copy_from_slice(buf);
                    true
                })
                .map_err(|kind| Error::new("write", self.name.as_str(), kind))?
        };

        self.node.with_meta_mut(|m| {
            m.size = new_len;
            m.touch();
        });
        self.offset = (write_at + buf.len()) as u64;
        Ok(buf.len())
    }

    /// Reposition the cursor. Seeking past the end is allowed; the
    /// next write zero-fills the gap.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open("seek")?;
        let size = self.node.metadata().size as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(delta) => self.offset as i64 + delta,
            SeekFrom::End(delta) => size + delta,
        };
        if target < 0 {
            return Err(Error::new(
                "seek",
                self.name.as_str(),
                ErrorKind::InvalidInput,
            ));
        }
        self.offset = target as u64;
        Ok(self.offset)
    }

    /// Set the file length through this handle. The cursor does not
    /// move.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        self.check_open("truncate")?;
        if !self.access.writable() {
            return Err(Error::new(
                "truncate",
                self.name.as_str(),
                ErrorKind::PermissionDenied,
            ));
        }
        let record = self.record("truncate")?;

        let new_len = {
            let _fs = self.inner.state.read();
            record
                .update(&self.inner.vault, |plain| {
                    if plain.len() as u64 == size {
                        return false;
                    }
                    plain.resize(size as usize, 0);
                    true
                })
                .map_err(|kind| Error::new("truncate", self.name.as_str(), kind))?
        };

        self.node.with_meta_mut(|m| {
            if m.size != new_len {
                m.size = new_len;
                m.touch();
            }
        });
        Ok(())
    }

    /// Invalidate the handle. The inode itself is only reaped by
    /// unlinking; closing takes no reference count with it.
    pub fn close(&mut self) -> Result<()> {
        self.check_open("close")?;
        self.closed = true;
        Ok(())
    }

    pub fn stat(&self) -> Result<FileInfo> {
        self.check_open("stat")?;
        Ok(FileInfo::from_node(
            path::base(&self.name),
            &self.node,
            self.inner.instance,
        ))
    }

    /// Stat every entry of an open directory, in name order.
    pub fn readdir(&mut self) -> Result<Vec<FileInfo>> {
        self.check_open("readdir")?;
        if !self.node.is_dir() {
            return Err(Error::new(
                "readdir",
                self.name.as_str(),
                ErrorKind::NotADirectory,
            ));
        }
        let state = self.inner.state.read();
        let mut infos = Vec::new();
        for (name, ino) in self.node.children() {
            if let Some(child) = state.table.get(ino) {
                infos.push(FileInfo::from_node(name, &child, self.inner.instance));
            }
        }
        Ok(infos)
    }

    /// Entry names of an open directory, sorted, `.`/`..` excluded.
    ///
    /// `None` returns everything remaining; `Some(n)` returns up to
    /// `n` names and advances the cursor.
    pub fn readdirnames(&mut self, n: Option<usize>) -> Result<Vec<String>> {
        self.check_open("readdirnames")?;
        if !self.node.is_dir() {
            return Err(Error::new(
                "readdirnames",
                self.name.as_str(),
                ErrorKind::NotADirectory,
            ));
        }
        let names = self.node.entry_names();
        let start = self.dir_pos.min(names.len());
        let end = match n {
            Some(count) => (start + count).min(names.len()),
            None => names.len(),
        };
        self.dir_pos = end;
        Ok(names[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::SecureFs;

    fn write_all(fs: &SecureFs, name: &str, bytes: &[u8]) {
        let mut file = fs.create(name).unwrap();
        assert_eq!(file.write(bytes).unwrap(), bytes.len());
        file.close().unwrap();
    }

    fn read_all(fs: &SecureFs, name: &str) -> Vec<u8> {
        let mut file = fs.open(name).unwrap();
        let size = file.stat().unwrap().size() as usize;
        let mut buf = vec![0u8; size + 8];
        let n = file.read(&mut buf).unwrap();
        assert_eq!(file.read(&mut [0u8; 8]).unwrap(), 0);
        file.close().unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let fs = SecureFs::new();
        write_all(&fs, "/f", b"hello");
        assert_eq!(read_all(&fs, "/f"), b"hello");
        assert_eq!(fs.stat("/f").unwrap().size(), 5);
    }

    #[test]
    fn test_partial_reads_advance_cursor() {
        let fs = SecureFs::new();
        write_all(&fs, "/f", b"abcdef");
        let mut file = fs.open("/f").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(file.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(file.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_append_positions_every_write_at_end() {
        let fs = SecureFs::new();
        write_all(&fs, "/log", b"one");
        let mut file = fs
            .open_file("/log", OpenFlags::WRITE_ONLY | OpenFlags::APPEND, 0)
            .unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write(b"-two").unwrap();
        file.close().unwrap();
        assert_eq!(read_all(&fs, "/log"), b"one-two");
    }

    #[test]
    fn test_overwrite_in_place() {
        let fs = SecureFs::new();
        write_all(&fs, "/f", b"xxxxxx");
        let mut file = fs
            .open_file("/f", OpenFlags::READ_WRITE, 0)
            .unwrap();
        file.seek(SeekFrom::Start(2)).unwrap();
        file.write(b"YY").unwrap();
        file.close().unwrap();
        assert_eq!(read_all(&fs, "/f"), b"xxYYxx");
    }

    #[test]
    fn test_sparse_write_zero_fills_gap() {
        let fs = SecureFs::new();
        let mut file = fs.create("/sparse").unwrap();
        file.seek(SeekFrom::Start(4)).unwrap();
        file.write(b"tail").unwrap();
        file.close().unwrap();
        assert_eq!(read_all(&fs, "/sparse"), b"\0\0\0\0tail");
    }

    #[test]
    fn test_seek_variants() {
        let fs = SecureFs::new();
        write_all(&fs, "/f", b"0123456789");
        let mut file = fs.open("/f").unwrap();
        assert_eq!(file.seek(SeekFrom::End(-2)).unwrap(), 8);
        let mut buf = [0u8; 2];
        file.read(&mut buf).unwrap();
        assert_eq!(&buf, b"89");
        assert_eq!(file.seek(SeekFrom::Current(-4)).unwrap(), 6);
        assert!(file.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_handle_truncate() {
        let fs = SecureFs::new();
        write_all(&fs, "/f", b"truncate me");
        let mut file = fs.open_file("/f", OpenFlags::READ_WRITE, 0).unwrap();
        file.truncate(8).unwrap();
        file.close().unwrap();
        assert_eq!(read_all(&fs, "/f"), b"truncate");
    }

    #[test]
    fn test_read_only_handle_rejects_writes() {
        let fs = SecureFs::new();
        write_all(&fs, "/f", b"data");
        let mut file = fs.open("/f").unwrap();
        let err = file.write(b"nope").unwrap_err();
        assert!(err.is_permission_denied());
        assert!(file.truncate(0).unwrap_err().is_permission_denied());
    }

    #[test]
    fn test_write_only_handle_rejects_reads() {
        let fs = SecureFs::new();
        write_all(&fs, "/f", b"data");
        let mut file = fs.open_file("/f", OpenFlags::WRITE_ONLY, 0).unwrap();
        assert!(file.read(&mut [0u8; 4]).unwrap_err().is_permission_denied());
    }

    #[test]
    fn test_closed_handle_rejects_everything() {
        let fs = SecureFs::new();
        write_all(&fs, "/f", b"data");
        let mut file = fs.open("/f").unwrap();
        file.close().unwrap();
        assert!(file.read(&mut [0u8; 4]).is_err());
        assert!(file.stat().is_err());
        assert!(file.close().is_err());
    }

    #[test]
    fn test_readdirnames_cursor() {
        let fs = SecureFs::new();
        fs.mkdir("/d", 0o755).unwrap();
        for name in ["c", "a", "b"] {
            write_all(&fs, &format!("/d/{name}"), b"");
        }
        let mut dir = fs.open("/d").unwrap();
        assert_eq!(dir.readdirnames(Some(2)).unwrap(), ["a", "b"]);
        assert_eq!(dir.readdirnames(Some(2)).unwrap(), ["c"]);
        assert!(dir.readdirnames(Some(2)).unwrap().is_empty());
    }

    #[test]
    fn test_readdirnames_all_excludes_structural() {
        let fs = SecureFs::new();
        fs.mkdir("/d", 0o755).unwrap();
        fs.mkdir("/d/sub", 0o755).unwrap();
        write_all(&fs, "/d/f", b"x");
        let mut dir = fs.open("/d").unwrap();
        assert_eq!(dir.readdirnames(None).unwrap(), ["f", "sub"]);
    }

    #[test]
    fn test_readdir_returns_infos() {
        let fs = SecureFs::new();
        fs.mkdir("/d", 0o755).unwrap();
        write_all(&fs, "/d/f", b"abc");
        let mut dir = fs.open("/d").unwrap();
        let infos = dir.readdir().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name(), "f");
        assert_eq!(infos[0].size(), 3);
    }

    #[test]
    fn test_read_on_directory_handle_fails() {
        let fs = SecureFs::new();
        fs.mkdir("/d", 0o755).unwrap();
        let mut dir = fs.open("/d").unwrap();
        assert_eq!(
            dir.read(&mut [0u8; 1]).unwrap_err().kind(),
            ErrorKind::IsADirectory
        );
    }
}
