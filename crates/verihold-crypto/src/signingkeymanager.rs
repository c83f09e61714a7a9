//! `SigningKeyManager` (spec §6): resolves a named purpose (e.g. an SMS
//! signing key, a token signing key) to the key material used to sign
//! outbound material for that purpose. Returns
//! [`CryptoError::NoSigningKeyManagement`] for a purpose nothing has been
//! configured for, distinct from "the key exists but lookup failed".

use crate::error::{CryptoError, CryptoResult};
use async_trait::async_trait;
use ring::hmac;
use std::collections::HashMap;
use std::sync::RwLock;

/// Signs data on behalf of a named purpose.
#[async_trait]
pub trait SigningKeyManager: Send + Sync {
    /// Sign `data` using the key configured for `purpose`.
    async fn sign(&self, purpose: &str, data: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Verify `signature` over `data` using the key configured for
    /// `purpose`.
    async fn verify(&self, purpose: &str, data: &[u8], signature: &[u8]) -> CryptoResult<bool>;
}

/// An in-memory `SigningKeyManager`, one HMAC key per purpose.
#[derive(Default)]
pub struct InMemorySigningKeyManager {
    keys: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySigningKeyManager {
    /// A signing key manager with no purposes configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the key used for `purpose` (e.g. `"sms"`, `"token"`).
    pub fn configure(&self, purpose: impl Into<String>, key: impl Into<Vec<u8>>) {
        self.keys.write().unwrap().insert(purpose.into(), key.into());
    }

    fn key_for(&self, purpose: &str) -> CryptoResult<hmac::Key> {
        let keys = self.keys.read().unwrap();
        let raw = keys
            .get(purpose)
            .ok_or_else(|| CryptoError::NoSigningKeyManagement(purpose.to_string()))?;
        Ok(hmac::Key::new(hmac::HMAC_SHA512, raw))
    }
}

#[async_trait]
impl SigningKeyManager for InMemorySigningKeyManager {
    async fn sign(&self, purpose: &str, data: &[u8]) -> CryptoResult<Vec<u8>> {
        let key = self.key_for(purpose)?;
        Ok(hmac::sign(&key, data).as_ref().to_vec())
    }

    async fn verify(&self, purpose: &str, data: &[u8], signature: &[u8]) -> CryptoResult<bool> {
        let key = self.key_for(purpose)?;
        Ok(hmac::verify(&key, data, signature).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_purpose_reports_no_signing_key_management() {
        let skm = InMemorySigningKeyManager::new();
        let err = skm.sign("sms", b"payload").await.unwrap_err();
        assert!(matches!(err, CryptoError::NoSigningKeyManagement(_)));
    }

    #[tokio::test]
    async fn configured_purpose_signs_and_verifies() {
        let skm = InMemorySigningKeyManager::new();
        skm.configure("token", b"token-signing-key".to_vec());

        let sig = skm.sign("token", b"payload").await.unwrap();
        assert!(skm.verify("token", b"payload", &sig).await.unwrap());
        assert!(!skm.verify("token", b"other", &sig).await.unwrap());
    }

    #[tokio::test]
    async fn purposes_are_independent() {
        let skm = InMemorySigningKeyManager::new();
        skm.configure("sms", b"sms-key".to_vec());
        skm.configure("token", b"token-key".to_vec());

        let sms_sig = skm.sign("sms", b"payload").await.unwrap();
        assert!(!skm.verify("token", b"payload", &sms_sig).await.unwrap());
    }
}
