//! API-key issuance and the envelope wire format (spec §4.2, §6).
//!
//! An API key is handed to callers as one opaque string:
//!
//! ```text
//! <b64url(64-byte opaque key)>.<realm id>.<b64url(HMAC-SHA-512 signature)>
//! ```
//!
//! The signature is computed over `"<opaque key b64url>.<realm id>"` with
//! [`RollingKeys`], so a key cannot be replayed against a different realm
//! and cannot be forged without the signing key set. A second, independent
//! `RollingKeys` set (`APIKeyDatabaseHMAC`) is used purely to index the
//! opaque key for database lookup, so that compromising the lookup index
//! does not also hand out the ability to mint new keys.
//!
//! Pre-envelope ("legacy") keys are bare opaque strings with no embedded
//! realm or signature; [`find_candidates`] supports both shapes so a
//! verification-code engine can look a caller-presented key up without
//! knowing in advance which generation issued it.

use crate::error::{CryptoError, CryptoResult};
use crate::hmac::RollingKeys;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

/// Size of the opaque key portion of an API key, in bytes.
const OPAQUE_KEY_SIZE: usize = 64;

/// A freshly issued API key: the string handed to the caller, plus the
/// value a repository should store for database lookup.
pub struct IssuedApiKey {
    /// The full envelope string to hand back to the caller. Shown exactly
    /// once; nothing it contains is stored verbatim.
    pub envelope: String,
    /// `HMAC(APIKeyDatabaseHMAC.primary, opaque key bytes)`, the value a
    /// repository indexes the `authorized_apps` row by.
    pub database_hmac: Vec<u8>,
}

/// An API key as presented by a caller, parsed but not yet verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentedApiKey {
    /// A modern, enveloped key: opaque bytes, the realm it claims to
    /// belong to, and its signature.
    Enveloped {
        /// Decoded opaque key bytes.
        opaque_key: Vec<u8>,
        /// The realm ID embedded in the envelope.
        realm_id: String,
        /// Decoded signature bytes.
        signature: Vec<u8>,
    },
    /// A pre-envelope key: the caller-presented string is the opaque key
    /// itself, with no realm scoping or signature to check.
    Legacy {
        /// The raw opaque key bytes (for legacy keys, just the input bytes).
        opaque_key: Vec<u8>,
    },
}

/// Issue a new API key for `realm_id`, signing it with `signature_keys` and
/// indexing it with `database_keys`.
pub fn issue(
    realm_id: &str,
    signature_keys: &RollingKeys,
    database_keys: &RollingKeys,
) -> IssuedApiKey {
    let mut opaque = vec![0u8; OPAQUE_KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut opaque);

    let opaque_b64 = URL_SAFE_NO_PAD.encode(&opaque);
    let signing_payload = format!("{opaque_b64}.{realm_id}");
    let signature = signature_keys.sign(signing_payload.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(&signature);

    IssuedApiKey {
        envelope: format!("{opaque_b64}.{realm_id}.{signature_b64}"),
        database_hmac: database_keys.sign(&opaque),
    }
}

/// Parse a caller-presented API key string. Three dot-separated segments
/// are treated as an envelope; anything else is treated as a legacy bare
/// opaque key (spec §4.2 dual-path lookup).
pub fn parse(presented: &str) -> CoreParseResult {
    let parts: Vec<&str> = presented.split('.').collect();
    if parts.len() == 3 {
        let opaque_key = URL_SAFE_NO_PAD
            .decode(parts[0])
            .map_err(|e| CryptoError::InvalidEnvelope(format!("bad opaque key: {e}")))?;
        let signature = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|e| CryptoError::InvalidEnvelope(format!("bad signature: {e}")))?;
        Ok(PresentedApiKey::Enveloped {
            opaque_key,
            realm_id: parts[1].to_string(),
            signature,
        })
    } else {
        Ok(PresentedApiKey::Legacy {
            opaque_key: presented.as_bytes().to_vec(),
        })
    }
}

type CoreParseResult = CryptoResult<PresentedApiKey>;

/// Verify a parsed, enveloped API key's signature against `signature_keys`.
/// Legacy keys carry no signature and always return `false` here; the
/// caller is expected to rely solely on the database-lookup match for them.
pub fn verify_envelope_signature(presented: &PresentedApiKey, signature_keys: &RollingKeys) -> bool {
    match presented {
        PresentedApiKey::Enveloped { opaque_key, realm_id, signature } => {
            let opaque_b64 = URL_SAFE_NO_PAD.encode(opaque_key);
            let payload = format!("{opaque_b64}.{realm_id}");
            signature_keys.verify(payload.as_bytes(), signature)
        }
        PresentedApiKey::Legacy { .. } => false,
    }
}

/// The opaque key bytes to index by, regardless of presentation shape.
pub fn opaque_key_bytes(presented: &PresentedApiKey) -> &[u8] {
    match presented {
        PresentedApiKey::Enveloped { opaque_key, .. } => opaque_key,
        PresentedApiKey::Legacy { opaque_key } => opaque_key,
    }
}

/// Every HMAC digest a repository should try when looking an API key up by
/// its database index column, covering every key in the rolling set (spec
/// §9 Open Question: legacy lookup matches any HMAC candidate, unscoped by
/// realm).
pub fn find_candidates(presented: &PresentedApiKey, database_keys: &RollingKeys) -> Vec<Vec<u8>> {
    database_keys.sign_with_each(opaque_key_bytes(presented))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(seed: &str) -> RollingKeys {
        RollingKeys::new(&[seed.as_bytes().to_vec()]).unwrap()
    }

    #[test]
    fn issued_key_parses_as_enveloped_and_verifies() {
        let sig_keys = keys("sig");
        let db_keys = keys("db");
        let issued = issue("realm-1", &sig_keys, &db_keys);

        let parsed = parse(&issued.envelope).unwrap();
        match &parsed {
            PresentedApiKey::Enveloped { realm_id, .. } => assert_eq!(realm_id, "realm-1"),
            _ => panic!("expected enveloped key"),
        }
        assert!(verify_envelope_signature(&parsed, &sig_keys));

        let candidates = find_candidates(&parsed, &db_keys);
        assert!(candidates.contains(&issued.database_hmac));
    }

    #[test]
    fn tampered_realm_fails_signature_verification() {
        let sig_keys = keys("sig");
        let db_keys = keys("db");
        let issued = issue("realm-1", &sig_keys, &db_keys);

        let tampered = issued.envelope.replacen("realm-1", "realm-2", 1);
        let parsed = parse(&tampered).unwrap();
        assert!(!verify_envelope_signature(&parsed, &sig_keys));
    }

    #[test]
    fn legacy_key_has_no_signature_but_still_indexes() {
        let db_keys = keys("db");
        let legacy = "old-style-opaque-key";
        let parsed = parse(legacy).unwrap();
        assert!(matches!(parsed, PresentedApiKey::Legacy { .. }));

        let candidates = find_candidates(&parsed, &db_keys);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0], db_keys.sign(legacy.as_bytes()));
    }

    #[test]
    fn not_found_and_bad_signature_are_indistinguishable_at_this_layer() {
        let sig_keys = keys("sig");
        let db_keys = keys("db");
        let issued = issue("realm-1", &sig_keys, &db_keys);
        let other_sig_keys = keys("different-signing-key");

        let parsed = parse(&issued.envelope).unwrap();
        // Neither branch panics or returns a distinguishing error variant;
        // both simply report `false`, exactly like "no row matched".
        assert!(!verify_envelope_signature(&parsed, &other_sig_keys));
    }
}
