//! `KeyManager`: the column-level encryption capability spec §6 calls out
//! as an external collaborator. Implementations are expected to wrap a real
//! KMS; this crate ships only an in-memory stand-in for tests and local
//! development (spec Non-goals: no KMS driver implementations in scope).

use crate::error::{CryptoError, CryptoResult};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::RwLock;

const NONCE_SIZE: usize = 12;

/// Encrypts and decrypts opaque byte payloads under a named key, with an
/// associated-data string binding ciphertext to the context it was
/// encrypted for (e.g. a table name), so ciphertext copied between columns
/// fails to decrypt rather than silently decrypting as something else.
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Encrypt `plaintext` under `key_id`, bound to `aad`.
    async fn encrypt(&self, key_id: &str, plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Decrypt `ciphertext` under `key_id`, bound to `aad`.
    async fn decrypt(&self, key_id: &str, ciphertext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>>;
}

/// An in-memory `KeyManager` backed by AES-256-GCM with keys held in
/// process memory. Not suitable for production use; exists for tests and
/// local development the way a real deployment would otherwise plug in a
/// cloud KMS.
pub struct InMemoryKeyManager {
    keys: RwLock<HashMap<String, [u8; 32]>>,
}

impl InMemoryKeyManager {
    /// An empty key manager; keys are created lazily on first use.
    pub fn new() -> Self {
        Self { keys: RwLock::new(HashMap::new()) }
    }

    /// Register a specific 32-byte key under `key_id`, replacing the
    /// current value.
    pub fn insert_key(&self, key_id: &str, key: [u8; 32]) {
        self.keys.write().unwrap().insert(key_id.to_string(), key);
    }

    fn key_for(&self, key_id: &str) -> [u8; 32] {
        if let Some(key) = self.keys.read().unwrap().get(key_id) {
            return *key;
        }
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        self.keys.write().unwrap().insert(key_id.to_string(), key);
        key
    }
}

impl Default for InMemoryKeyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyManager for InMemoryKeyManager {
    async fn encrypt(&self, key_id: &str, plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        let key = self.key_for(key_id);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let payload = aes_gcm::aead::Payload { msg: plaintext, aad };
        let ciphertext = cipher.encrypt(nonce, payload)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    async fn decrypt(&self, key_id: &str, ciphertext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed("ciphertext too short".to_string()));
        }
        let key = self.key_for(key_id);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        let (nonce_bytes, body) = ciphertext.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let payload = aes_gcm::aead::Payload { msg: body, aad };
        Ok(cipher.decrypt(nonce, payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_encrypt_decrypt() {
        let km = InMemoryKeyManager::new();
        let ciphertext = km.encrypt("col:secret_value", b"hello world", b"secrets").await.unwrap();
        let plaintext = km.decrypt("col:secret_value", &ciphertext, b"secrets").await.unwrap();
        assert_eq!(plaintext, b"hello world");
    }

    #[tokio::test]
    async fn decrypt_fails_with_wrong_aad() {
        let km = InMemoryKeyManager::new();
        let ciphertext = km.encrypt("col:secret_value", b"hello world", b"secrets").await.unwrap();
        assert!(km.decrypt("col:secret_value", &ciphertext, b"different").await.is_err());
    }

    #[tokio::test]
    async fn decrypt_fails_under_the_wrong_key() {
        let km = InMemoryKeyManager::new();
        let ciphertext = km.encrypt("col:a", b"hello world", b"secrets").await.unwrap();
        assert!(km.decrypt("col:b", &ciphertext, b"secrets").await.is_err());
    }
}
