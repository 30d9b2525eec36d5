//! Content encryption with ChaCha20-Poly1305
//!
//! A fresh random nonce is drawn for every encryption and prepended to
//! the ciphertext, so a ciphertext is self-contained: nonce, then
//! encrypted payload, then authentication tag.

use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

use super::{KEY_SIZE, NONCE_SIZE};
use crate::error::ErrorKind;

/// Encrypt `plaintext` under `key` with a random nonce.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, ErrorKind> {
    let cipher = ChaCha20Poly1305::new(key.into());
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| ErrorKind::Internal)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a nonce-prefixed ciphertext.
///
/// The returned buffer is wiped when dropped. Truncated input and
/// authentication failure both report the payload as corrupted.
pub fn decrypt(key: &[u8; KEY_SIZE], data: &[u8]) -> Result<Zeroizing<Vec<u8>>, ErrorKind> {
    if data.len() < NONCE_SIZE {
        return Err(ErrorKind::CorruptedPayload);
    }
    let cipher = ChaCha20Poly1305::new(key.into());
    let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);

    cipher
        .decrypt(nonce, &data[NONCE_SIZE..])
        .map(Zeroizing::new)
        .map_err(|_| ErrorKind::CorruptedPayload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::OVERHEAD;

    fn test_key(fill: u8) -> [u8; KEY_SIZE] {
        [fill; KEY_SIZE]
    }

    #[test]
    fn test_roundtrip() {
        let key = test_key(7);
        let ciphertext = encrypt(&key, b"hello world").unwrap();
        let plaintext = decrypt(&key, &ciphertext).unwrap();
        assert_eq!(&plaintext[..], b"hello world");
    }

    #[test]
    fn test_ciphertext_layout() {
        let key = test_key(1);
        let ciphertext = encrypt(&key, b"hello").unwrap();
        assert_eq!(ciphertext.len(), 5 + OVERHEAD);
        assert_ne!(&ciphertext[NONCE_SIZE..NONCE_SIZE + 5], b"hello");
    }

    #[test]
    fn test_nonce_is_random() {
        let key = test_key(2);
        let a = encrypt(&key, b"same input").unwrap();
        let b = encrypt(&key, b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = encrypt(&test_key(3), b"secret").unwrap();
        let err = decrypt(&test_key(4), &ciphertext).unwrap_err();
        assert_eq!(err, ErrorKind::CorruptedPayload);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key(5);
        let mut ciphertext = encrypt(&key, b"secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert_eq!(decrypt(&key, &ciphertext).unwrap_err(), ErrorKind::CorruptedPayload);
    }

    #[test]
    fn test_truncated_input_fails() {
        let key = test_key(6);
        assert_eq!(decrypt(&key, b"short").unwrap_err(), ErrorKind::CorruptedPayload);
    }
}
