//! Rolling-key HMAC (spec §4.1, §9): signatures are always produced with
//! the primary (first) key, but verification walks the entire configured
//! key set without short-circuiting, so an operator can add a new primary
//! key, let every previously-issued signature keep verifying against the
//! old one, and retire the old key once nothing references it any more.

use crate::error::{CryptoError, CryptoResult};
use ring::hmac;

/// An ordered set of HMAC keys. `keys[0]` is the current signing key;
/// every key is a verification candidate.
#[derive(Clone)]
pub struct RollingKeys {
    keys: Vec<hmac::Key>,
}

impl RollingKeys {
    /// Build a rolling key set from raw key material, in priority order
    /// (most current first). Returns `InvalidConfiguration` if empty.
    pub fn new(raw_keys: &[Vec<u8>]) -> CryptoResult<Self> {
        if raw_keys.is_empty() {
            return Err(CryptoError::InvalidConfiguration(
                "rolling HMAC key set must not be empty".to_string(),
            ));
        }
        let keys = raw_keys
            .iter()
            .map(|k| hmac::Key::new(hmac::HMAC_SHA512, k))
            .collect();
        Ok(Self { keys })
    }

    /// Sign `data` with the primary (first) key. This is the only key ever
    /// used to produce a new signature.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        hmac::sign(&self.keys[0], data).as_ref().to_vec()
    }

    /// Verify `signature` against `data` using every configured key, never
    /// stopping early at the first mismatch. Stopping early would let an
    /// attacker distinguish "right key, wrong data" from "wrong key" by
    /// timing, and would also make the rolling-key story itself pointless
    /// (a signature made with an older key must still verify here).
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let mut any_ok = false;
        for key in &self.keys {
            let ok = hmac::verify(key, data, signature).is_ok();
            any_ok |= ok;
        }
        any_ok
    }

    /// Sign `data` with every configured key, returning one signature per
    /// key in priority order. Used to build the set of HMAC candidates for
    /// a "find by any previously valid index value" database lookup (spec
    /// §4.1 "storage-lookup HMAC sets for rotation"), where the caller
    /// doesn't know in advance which key produced the stored value.
    pub fn sign_with_each(&self, data: &[u8]) -> Vec<Vec<u8>> {
        self.keys
            .iter()
            .map(|key| hmac::sign(key, data).as_ref().to_vec())
            .collect()
    }

    /// Number of configured keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if no keys are configured. Cannot actually occur once
    /// constructed via [`RollingKeys::new`], provided for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_key_set() {
        assert!(RollingKeys::new(&[]).is_err());
    }

    #[test]
    fn signs_with_primary_and_verifies() {
        let keys = RollingKeys::new(&[b"key-one".to_vec()]).unwrap();
        let sig = keys.sign(b"payload");
        assert!(keys.verify(b"payload", &sig));
        assert!(!keys.verify(b"other-payload", &sig));
    }

    #[test]
    fn verifies_signatures_from_retired_keys() {
        let old_key = b"old-key".to_vec();
        let new_key = b"new-key".to_vec();

        let old_keys = RollingKeys::new(&[old_key.clone()]).unwrap();
        let sig = old_keys.sign(b"payload");

        // Rotate: new key first, old key retained only for verification.
        let rotated = RollingKeys::new(&[new_key, old_key]).unwrap();
        assert!(rotated.verify(b"payload", &sig));
    }

    #[test]
    fn sign_with_each_returns_one_digest_per_key() {
        let keys = RollingKeys::new(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]).unwrap();
        let digests = keys.sign_with_each(b"payload");
        assert_eq!(digests.len(), 3);
        assert_eq!(digests[0], keys.sign(b"payload"));
    }

    #[test]
    fn new_signatures_use_only_the_primary_key() {
        let keys = RollingKeys::new(&[b"new-key".to_vec(), b"old-key".to_vec()]).unwrap();
        let sig = keys.sign(b"payload");

        let only_old = RollingKeys::new(&[b"old-key".to_vec()]).unwrap();
        assert!(!only_old.verify(b"payload", &sig));
    }
}
