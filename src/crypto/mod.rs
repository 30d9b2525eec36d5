//! Cryptographic primitives
//!
//! Content encryption and the sealed-key discipline. Low-level
//! functions report bare [`ErrorKind`](crate::error::ErrorKind)s; the
//! filesystem layer attaches operation and path context.

mod cipher;
mod sealed;

pub use cipher::{decrypt, encrypt};
pub use sealed::{KeyVault, OpenKey, SealedKey};

/// Symmetric key size in bytes (ChaCha20-Poly1305)
pub const KEY_SIZE: usize = 32;

/// Nonce size in bytes, prepended to every ciphertext
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Ciphertext overhead over the plaintext length
pub const OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
