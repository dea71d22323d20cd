//! Encryption seam for the upload worker.
//!
//! The embedding application may supply its own engine (e.g. a libsodium
//! secret-stream implementation); the default engine here covers the same
//! contract with ChaCha20-Poly1305.

use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;

use aperture_types::{Result, UploadError};

/// Output of whole-file stream encryption.
pub struct StreamEncryptResult {
    /// File key; freshly generated unless the caller supplied one.
    pub key: [u8; 32],
    /// Decryption header the catalog stores alongside the blob.
    pub header: Vec<u8>,
}

/// Output of single-shot chunk encryption (thumbnails, metadata).
pub struct EncryptedChunk {
    pub encrypted_data: Vec<u8>,
    pub header: Vec<u8>,
}

/// A file key wrapped under a collection key.
pub struct WrappedKey {
    pub encrypted_data: Vec<u8>,
    pub nonce: Vec<u8>,
}

pub trait CryptoEngine: Send + Sync {
    /// Encrypt the file at `src` into `dst`. Re-uses `key` when given
    /// (update path), otherwise generates a fresh one.
    fn encrypt_file(
        &self,
        src: &Path,
        dst: &Path,
        key: Option<&[u8; 32]>,
    ) -> Result<StreamEncryptResult>;

    /// AEAD-encrypt an in-memory buffer under `key`.
    fn encrypt_chunk(&self, plaintext: &[u8], key: &[u8; 32]) -> Result<EncryptedChunk>;

    /// Inverse of `encrypt_chunk`.
    fn decrypt_chunk(&self, data: &[u8], header: &[u8], key: &[u8; 32]) -> Result<Vec<u8>>;

    /// Symmetrically wrap a file key under a collection key.
    fn wrap_key(&self, key: &[u8; 32], wrapping_key: &[u8; 32]) -> Result<WrappedKey>;

    /// Recover a file key wrapped by `wrap_key`.
    fn unwrap_key(
        &self,
        wrapped: &[u8],
        nonce: &[u8],
        wrapping_key: &[u8; 32],
    ) -> Result<[u8; 32]>;
}

/// Default ChaCha20-Poly1305 engine. Headers and nonces are 12 random
/// bytes; ciphertexts carry the appended 16-byte tag.
pub struct ChaCha20Poly1305Engine;

impl ChaCha20Poly1305Engine {
    fn fresh_nonce() -> [u8; 12] {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    fn seal(plaintext: &[u8], key: &[u8; 32]) -> Result<(Vec<u8>, [u8; 12])> {
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| UploadError::Crypto(format!("invalid key: {e}")))?;
        let nonce_bytes = Self::fresh_nonce();
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| UploadError::Crypto(format!("encrypt: {e}")))?;
        Ok((ciphertext, nonce_bytes))
    }

    fn open(data: &[u8], nonce: &[u8], key: &[u8; 32]) -> Result<Vec<u8>> {
        if nonce.len() != 12 {
            return Err(UploadError::DecryptionFailed);
        }
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| UploadError::Crypto(format!("invalid key: {e}")))?;
        cipher
            .decrypt(Nonce::from_slice(nonce), data)
            .map_err(|_| UploadError::DecryptionFailed)
    }
}

impl CryptoEngine for ChaCha20Poly1305Engine {
    fn encrypt_file(
        &self,
        src: &Path,
        dst: &Path,
        key: Option<&[u8; 32]>,
    ) -> Result<StreamEncryptResult> {
        let key = match key {
            Some(k) => *k,
            None => {
                let mut k = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut k);
                k
            }
        };
        let plaintext = std::fs::read(src)?;
        let (ciphertext, nonce) = Self::seal(&plaintext, &key)?;
        std::fs::write(dst, &ciphertext)?;
        Ok(StreamEncryptResult {
            key,
            header: nonce.to_vec(),
        })
    }

    fn encrypt_chunk(&self, plaintext: &[u8], key: &[u8; 32]) -> Result<EncryptedChunk> {
        let (ciphertext, nonce) = Self::seal(plaintext, key)?;
        Ok(EncryptedChunk {
            encrypted_data: ciphertext,
            header: nonce.to_vec(),
        })
    }

    fn decrypt_chunk(&self, data: &[u8], header: &[u8], key: &[u8; 32]) -> Result<Vec<u8>> {
        Self::open(data, header, key)
    }

    fn wrap_key(&self, key: &[u8; 32], wrapping_key: &[u8; 32]) -> Result<WrappedKey> {
        let (ciphertext, nonce) = Self::seal(key, wrapping_key)?;
        Ok(WrappedKey {
            encrypted_data: ciphertext,
            nonce: nonce.to_vec(),
        })
    }

    fn unwrap_key(
        &self,
        wrapped: &[u8],
        nonce: &[u8],
        wrapping_key: &[u8; 32],
    ) -> Result<[u8; 32]> {
        let plain = Self::open(wrapped, nonce, wrapping_key)?;
        let key: [u8; 32] = plain
            .try_into()
            .map_err(|_| UploadError::DecryptionFailed)?;
        Ok(key)
    }
}
