//! Sealed payload store
//!
//! Each regular file owns a [`SealedFile`] record holding its
//! ciphertext and the sealed key that encrypted it. Records live in a
//! dense spine indexed by inode number; directories, symlinks, and
//! freed inodes leave holes.
//!
//! All plaintext produced here is wiped on release, and every opened
//! key is destroyed before the call returns, on success and error
//! paths alike. Key rotation and ciphertext replacement happen as one
//! swap under the record's exclusive lock.

use std::sync::Arc;

use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::crypto::{self, KeyVault, SealedKey};
use crate::error::ErrorKind;
use crate::metadata::{FileType, Ino};

struct SealedPayload {
    ciphertext: Vec<u8>,
    key: Option<SealedKey>,
}

/// One regular file's encrypted contents plus its sealed key.
///
/// The interior lock is the per-file lock of the concurrency model:
/// shared for reads, exclusive for writes and truncation.
pub struct SealedFile {
    payload: RwLock<SealedPayload>,
}

impl SealedFile {
    pub fn new() -> Self {
        SealedFile {
            payload: RwLock::new(SealedPayload {
                ciphertext: Vec::new(),
                key: None,
            }),
        }
    }

    /// Decrypt the full plaintext under the shared lock.
    ///
    /// An empty record decrypts to an empty buffer. The returned
    /// buffer is wiped on drop.
    pub fn read_plaintext(&self, vault: &KeyVault) -> Result<Zeroizing<Vec<u8>>, ErrorKind> {
        let payload = self.payload.read();
        if payload.ciphertext.is_empty() {
            return Ok(Zeroizing::new(Vec::new()));
        }
        let key = payload.key.as_ref().ok_or(ErrorKind::Internal)?;
        let open = vault.open(key)?;
        crypto::decrypt(open.bytes(), &payload.ciphertext)
    }

    /// Read-modify-write under the exclusive lock.
    ///
    /// The closure edits the decrypted plaintext in place and reports
    /// whether it changed anything. On change the plaintext is
    /// re-encrypted under a fresh key and both ciphertext and sealed
    /// key are swapped in together; otherwise the record is left
    /// untouched. Returns the resulting plaintext length.
    pub fn update<F>(&self, vault: &KeyVault, f: F) -> Result<u64, ErrorKind>
    where
        F: FnOnce(&mut Vec<u8>) -> bool,
    {
        let mut payload = self.payload.write();
        let mut plaintext = if payload.ciphertext.is_empty() {
            Zeroizing::new(Vec::new())
        } else {
            let key = payload.key.as_ref().ok_or(ErrorKind::Internal)?;
            let open = vault.open(key)?;
            crypto::decrypt(open.bytes(), &payload.ciphertext)?
        };

        let changed = f(&mut plaintext);
        let len = plaintext.len() as u64;
        if !changed {
            return Ok(len);
        }

        if plaintext.is_empty() {
            payload.ciphertext = Vec::new();
            payload.key = None;
            return Ok(0);
        }

        let key = vault.generate();
        let ciphertext = crypto::encrypt(key.bytes(), &plaintext)?;
        let sealed = vault.seal(&key)?;
        payload.ciphertext = ciphertext;
        payload.key = Some(sealed);
        Ok(len)
    }

    /// Drop ciphertext and key, returning the record to the empty
    /// state. Used by truncating opens.
    pub fn clear(&self) {
        let mut payload = self.payload.write();
        payload.ciphertext = Vec::new();
        payload.key = None;
    }

    /// Current ciphertext, including nonce and tag. Opaque bytes.
    pub fn ciphertext(&self) -> Vec<u8> {
        self.payload.read().ciphertext.clone()
    }

    pub fn ciphertext_len(&self) -> usize {
        self.payload.read().ciphertext.len()
    }
}

impl Default for SealedFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Dense array of sealed records indexed by inode number.
///
/// Slot 0 is unused and slot 1 belongs to the root directory, which
/// carries no payload; the spine length tracks the highest allocated
/// inode number plus one.
pub struct PayloadStore {
    slots: Vec<Option<Arc<SealedFile>>>,
}

impl PayloadStore {
    pub fn new() -> Self {
        PayloadStore {
            slots: vec![None, None],
        }
    }

    /// Extend the spine to cover `ino`, attaching a fresh empty record
    /// for regular files and a hole for everything else.
    pub fn register(&mut self, ino: Ino, kind: FileType) {
        let idx = ino as usize;
        if self.slots.len() <= idx {
            self.slots.resize_with(idx + 1, || None);
        }
        if kind == FileType::Regular {
            self.slots[idx] = Some(Arc::new(SealedFile::new()));
        }
    }

    /// Release the record at `ino`, leaving a hole. The slot index is
    /// never reused; inode numbers are monotonic.
    pub fn unregister(&mut self, ino: Ino) {
        if let Some(slot) = self.slots.get_mut(ino as usize) {
            *slot = None;
        }
    }

    pub fn get(&self, ino: Ino) -> Option<Arc<SealedFile>> {
        self.slots.get(ino as usize).and_then(Clone::clone)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for PayloadStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::OVERHEAD;

    #[test]
    fn test_empty_record_reads_empty() {
        let vault = KeyVault::new();
        let record = SealedFile::new();
        assert!(record.read_plaintext(&vault).unwrap().is_empty());
        assert_eq!(record.ciphertext_len(), 0);
    }

    #[test]
    fn test_update_then_read() {
        let vault = KeyVault::new();
        let record = SealedFile::new();
        let len = record
            .update(&vault, |plain| {
                plain.extend_from_slice(b"hello");
                true
            })
            .unwrap();
        assert_eq!(len, 5);
        assert_eq!(&record.read_plaintext(&vault).unwrap()[..], b"hello");
        assert_eq!(record.ciphertext_len(), 5 + OVERHEAD);
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let vault = KeyVault::new();
        let record = SealedFile::new();
        record
            .update(&vault, |plain| {
                plain.extend_from_slice(b"secret data");
                true
            })
            .unwrap();
        let ciphertext = record.ciphertext();
        assert!(!ciphertext.windows(11).any(|w| w == b"secret data"));
    }

    #[test]
    fn test_rewrite_swaps_ciphertext() {
        let vault = KeyVault::new();
        let record = SealedFile::new();
        record
            .update(&vault, |plain| {
                plain.extend_from_slice(b"same");
                true
            })
            .unwrap();
        let before = record.ciphertext();
        record
            .update(&vault, |plain| {
                plain.clear();
                plain.extend_from_slice(b"same");
                true
            })
            .unwrap();
        // Fresh key and nonce: identical plaintext, new ciphertext.
        assert_ne!(before, record.ciphertext());
        assert_eq!(&record.read_plaintext(&vault).unwrap()[..], b"same");
    }

    #[test]
    fn test_unchanged_update_keeps_record() {
        let vault = KeyVault::new();
        let record = SealedFile::new();
        record
            .update(&vault, |plain| {
                plain.extend_from_slice(b"stable");
                true
            })
            .unwrap();
        let before = record.ciphertext();
        let len = record.update(&vault, |_| false).unwrap();
        assert_eq!(len, 6);
        assert_eq!(before, record.ciphertext());
    }

    #[test]
    fn test_truncate_to_empty_drops_key() {
        let vault = KeyVault::new();
        let record = SealedFile::new();
        record
            .update(&vault, |plain| {
                plain.extend_from_slice(b"bytes");
                true
            })
            .unwrap();
        record
            .update(&vault, |plain| {
                plain.clear();
                true
            })
            .unwrap();
        assert_eq!(record.ciphertext_len(), 0);
        assert!(record.read_plaintext(&vault).unwrap().is_empty());
    }

    #[test]
    fn test_store_registers_files_and_holes() {
        let mut store = PayloadStore::new();
        assert_eq!(store.len(), 2);

        store.register(2, FileType::Regular);
        store.register(3, FileType::Directory);
        store.register(4, FileType::Symlink);
        assert_eq!(store.len(), 5);
        assert!(store.get(2).is_some());
        assert!(store.get(3).is_none());
        assert!(store.get(4).is_none());
        assert!(store.get(1).is_none());

        store.unregister(2);
        assert!(store.get(2).is_none());
        assert_eq!(store.len(), 5);
    }
}
