//! Sealed per-file keys
//!
//! Each regular file is encrypted under its own 32-byte key. At rest
//! the file key itself is held only in sealed form: encrypted under a
//! per-filesystem master key that lives inside [`secrecy::Secret`] and
//! never leaves this module. Opening a sealed key yields an
//! [`OpenKey`] whose backing buffer is wiped on drop, so the
//! open-use-destroy window is enforced by scope.

use chacha20poly1305::aead::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use zeroize::Zeroizing;

use super::{cipher, KEY_SIZE};
use crate::error::ErrorKind;

/// Seals and opens file keys for one filesystem instance.
///
/// The master key is generated at filesystem creation and is never
/// exported; dropping the vault (with the filesystem) wipes it, which
/// renders every sealed key in the store permanently unopenable.
pub struct KeyVault {
    master: Secret<[u8; KEY_SIZE]>,
}

/// A file key in sealed (encrypted) form. Opaque bytes; useless
/// without the vault that sealed it.
pub struct SealedKey(Vec<u8>);

/// A file key in usable form. The buffer is zeroed when the value is
/// dropped; dropping is the destroy step of the open-destroy cycle.
pub struct OpenKey(Zeroizing<[u8; KEY_SIZE]>);

impl std::fmt::Debug for OpenKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenKey").finish()
    }
}

impl KeyVault {
    /// Create a vault with a fresh random master key.
    pub fn new() -> Self {
        let mut master = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut master);
        KeyVault {
            master: Secret::new(master),
        }
    }

    /// Draw a fresh file key from the OS CSPRNG.
    pub fn generate(&self) -> OpenKey {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(key.as_mut());
        OpenKey(key)
    }

    /// Seal a file key under the master key.
    pub fn seal(&self, key: &OpenKey) -> Result<SealedKey, ErrorKind> {
        cipher::encrypt(self.master.expose_secret(), key.bytes()).map(SealedKey)
    }

    /// Open a sealed key into a wiped-on-drop buffer.
    ///
    /// Failure here means the vault state itself is damaged, not the
    /// file payload, so it reports as internal.
    pub fn open(&self, sealed: &SealedKey) -> Result<OpenKey, ErrorKind> {
        let plain = cipher::decrypt(self.master.expose_secret(), &sealed.0)
            .map_err(|_| ErrorKind::Internal)?;
        if plain.len() != KEY_SIZE {
            return Err(ErrorKind::Internal);
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&plain);
        Ok(OpenKey(key))
    }
}

impl Default for KeyVault {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenKey {
    /// The raw key bytes. Only valid while the `OpenKey` is alive.
    pub fn bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl SealedKey {
    /// Size of the sealed representation in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
