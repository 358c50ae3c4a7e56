//! AES-128-CTR entry encryption
//!
//! Stored layout of an encrypted entry: the 16-byte counter seed followed by
//! the ciphertext. Encryption is applied after compression, so readers
//! decrypt first and inflate second.

use std::fmt;

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

use crate::error::{ArchiveError, Result};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Key length, equal to the AES block size.
pub const KEY_SIZE: usize = 16;

/// Length of the counter seed prefixed to each encrypted entry.
pub const NONCE_SIZE: usize = 16;

/// Fixed-length key derived from a build-time secret.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey([u8; KEY_SIZE]);

impl CipherKey {
    /// Right-pad the secret with NULs, or truncate it, to `KEY_SIZE`.
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut key = [0u8; KEY_SIZE];
        let len = secret.len().min(KEY_SIZE);
        key[..len].copy_from_slice(&secret[..len]);
        Self(key)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(..)")
    }
}

/// Stream cipher context shared by every encrypted entry of a container.
///
/// Holds only the key; keystream state is built per call, so one context can
/// be used from many threads at once.
#[derive(Debug, Clone)]
pub struct Cipher {
    key: CipherKey,
}

impl Cipher {
    /// Create a cipher context.
    pub fn new(key: CipherKey) -> Self {
        Self { key }
    }

    /// Key in use.
    pub fn key(&self) -> &CipherKey {
        &self.key
    }

    /// Encrypt with a fresh random counter seed.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.encrypt_with_nonce(&nonce, plaintext)
    }

    /// Encrypt with a caller-chosen counter seed.
    pub fn encrypt_with_nonce(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_SIZE + plaintext.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(plaintext);
        self.keystream(nonce).apply_keystream(&mut out[NONCE_SIZE..]);
        out
    }

    /// Split off the counter seed and decrypt the rest.
    pub fn decrypt(&self, name: &str, stored: &[u8]) -> Result<Vec<u8>> {
        if stored.len() < NONCE_SIZE {
            return Err(ArchiveError::DecryptionFailed {
                name: name.to_string(),
                reason: format!(
                    "payload of {} bytes is shorter than the {}-byte counter seed",
                    stored.len(),
                    NONCE_SIZE
                ),
            });
        }

        let (seed, ciphertext) = stored.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(seed);

        let mut plaintext = ciphertext.to_vec();
        self.keystream(&nonce).apply_keystream(&mut plaintext);
        Ok(plaintext)
    }

    fn keystream(&self, nonce: &[u8; NONCE_SIZE]) -> Aes128Ctr {
        Aes128Ctr::new(&(*self.key.as_bytes()).into(), &(*nonce).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_padding_and_truncation() {
        assert_eq!(
            CipherKey::from_secret(b"abc").as_bytes(),
            b"abc\0\0\0\0\0\0\0\0\0\0\0\0\0"
        );
        assert_eq!(
            CipherKey::from_secret(b"0123456789abcdefXYZ").as_bytes(),
            b"0123456789abcdef"
        );
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = CipherKey::from_secret(b"hunter2");
        assert_eq!(format!("{:?}", key), "CipherKey(..)");
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = Cipher::new(CipherKey::from_secret(b"build-secret"));
        let stored = cipher.encrypt(b"opaque unit bytes");
        assert_eq!(stored.len(), NONCE_SIZE + 17);
        assert_ne!(&stored[NONCE_SIZE..], b"opaque unit bytes");
        assert_eq!(cipher.decrypt("m", &stored).unwrap(), b"opaque unit bytes");
    }

    #[test]
    fn test_nonce_is_stored_as_prefix() {
        let cipher = Cipher::new(CipherKey::from_secret(b"k"));
        let nonce = [7u8; NONCE_SIZE];
        let stored = cipher.encrypt_with_nonce(&nonce, b"payload");
        assert_eq!(&stored[..NONCE_SIZE], &nonce);
        // Same seed, same keystream.
        assert_eq!(stored, cipher.encrypt_with_nonce(&nonce, b"payload"));
    }

    #[test]
    fn test_wrong_key_yields_different_plaintext() {
        let stored = Cipher::new(CipherKey::from_secret(b"right")).encrypt(b"payload");
        let other = Cipher::new(CipherKey::from_secret(b"wrong"));
        assert_ne!(other.decrypt("m", &stored).unwrap(), b"payload");
    }

    #[test]
    fn test_short_payload_fails() {
        let cipher = Cipher::new(CipherKey::from_secret(b"k"));
        assert!(matches!(
            cipher.decrypt("m", &[1, 2, 3]),
            Err(ArchiveError::DecryptionFailed { .. })
        ));
    }
}
