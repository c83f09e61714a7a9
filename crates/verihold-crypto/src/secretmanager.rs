//! `SecretManager` (spec §6): the external collaborator that resolves a
//! named secret (an HMAC key, a signing key, a third-party credential) to
//! its current value. Real deployments back this with a cloud secret
//! manager; this crate ships only the stand-ins needed for tests and local
//! development (spec Non-goals: no secret-manager driver implementations
//! in scope).

use crate::error::{CryptoError, CryptoResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Resolves a secret name to its current value.
#[async_trait]
pub trait SecretManager: Send + Sync {
    /// Fetch the current value of `name`. Returns
    /// [`CryptoError::SecretNotExist`] if no active secret has that name.
    async fn get_secret(&self, name: &str) -> CryptoResult<Vec<u8>>;
}

/// An in-memory `SecretManager`, useful for unit tests.
#[derive(Default)]
pub struct InMemorySecretManager {
    secrets: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySecretManager {
    /// An empty secret manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) a secret's value.
    pub fn set_secret(&self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.secrets.write().unwrap().insert(name.into(), value.into());
    }
}

#[async_trait]
impl SecretManager for InMemorySecretManager {
    async fn get_secret(&self, name: &str) -> CryptoResult<Vec<u8>> {
        self.secrets
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| CryptoError::SecretNotExist(name.to_string()))
    }
}

/// A `SecretManager` backed by flat files under a base directory, one file
/// per secret name. Intended for local development, where mounting a
/// directory of files is the cheapest stand-in for a real secret store.
pub struct FilesystemSecretManager {
    base_dir: PathBuf,
}

impl FilesystemSecretManager {
    /// Resolve secrets as files under `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path_for(&self, name: &str) -> CryptoResult<PathBuf> {
        if name.contains('/') || name.contains("..") {
            return Err(CryptoError::InvalidInput(format!(
                "secret name must not contain path separators: {name}"
            )));
        }
        Ok(self.base_dir.join(name))
    }
}

#[async_trait]
impl SecretManager for FilesystemSecretManager {
    async fn get_secret(&self, name: &str) -> CryptoResult<Vec<u8>> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CryptoError::SecretNotExist(name.to_string()))
            }
            Err(e) => Err(CryptoError::IoError(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_returns_secret_not_exist_for_unknown_name() {
        let sm = InMemorySecretManager::new();
        let err = sm.get_secret("missing").await.unwrap_err();
        assert!(matches!(err, CryptoError::SecretNotExist(_)));
    }

    #[tokio::test]
    async fn in_memory_returns_set_secret() {
        let sm = InMemorySecretManager::new();
        sm.set_secret("db-hmac", b"super-secret".to_vec());
        assert_eq!(sm.get_secret("db-hmac").await.unwrap(), b"super-secret");
    }

    #[tokio::test]
    async fn filesystem_reads_secret_from_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("api-key"), b"file-secret").await.unwrap();

        let sm = FilesystemSecretManager::new(dir.path());
        assert_eq!(sm.get_secret("api-key").await.unwrap(), b"file-secret");
    }

    #[tokio::test]
    async fn filesystem_reports_secret_not_exist_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let sm = FilesystemSecretManager::new(dir.path());
        assert!(matches!(
            sm.get_secret("missing").await.unwrap_err(),
            CryptoError::SecretNotExist(_)
        ));
    }

    #[tokio::test]
    async fn filesystem_rejects_path_traversal_names() {
        let dir = tempfile::tempdir().unwrap();
        let sm = FilesystemSecretManager::new(dir.path());
        assert!(matches!(
            sm.get_secret("../escape").await.unwrap_err(),
            CryptoError::InvalidInput(_)
        ));
    }
}
