//! Error types for the Verihold cryptographic layer: rolling-key HMAC,
//! API-key envelopes, column-level encryption, and the `KeyManager` /
//! `SecretManager` / `SigningKeyManager` capability traits.

use thiserror::Error;

/// Result type alias for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Main error type for all cryptographic operations (spec §7).
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption operation failed.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// An API-key or verification-code HMAC signature did not verify
    /// against any key in the rolling key set.
    #[error("HMAC signature verification failed")]
    HmacVerificationFailed,

    /// An API-key envelope string was malformed (wrong arity, bad base64).
    #[error("invalid API key envelope: {0}")]
    InvalidEnvelope(String),

    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Invalid key format or size.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Key not found in the key store.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A `SecretManager` lookup found no active secret with the given name
    /// (spec §7 `SecretNotExist`).
    #[error("secret does not exist: {0}")]
    SecretNotExist(String),

    /// A `SigningKeyManager` was asked for a key but none is configured for
    /// that purpose (spec §7 `NoSigningKeyManagement`).
    #[error("no signing key management configured for: {0}")]
    NoSigningKeyManagement(String),

    /// Invalid configuration (e.g. an empty rolling key list).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Encoding/decoding error.
    #[error("encoding error: {0}")]
    EncodingError(String),

    /// I/O operation failed (filesystem-backed secret/key managers).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A transient failure a caller may retry (spec §7 `Transient`).
    #[error("transient error: {0}")]
    Transient(String),

    /// Internal error that should not normally occur.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl CryptoError {
    /// Check if this error is retryable (spec §7 propagation rules).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CryptoError::Transient(_))
    }

    /// Check if this error indicates a key- or secret-related problem.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidKey(_)
                | CryptoError::KeyNotFound(_)
                | CryptoError::KeyGenerationFailed(_)
                | CryptoError::SecretNotExist(_)
                | CryptoError::NoSigningKeyManagement(_)
        )
    }

    /// Check if this error is the "nothing matched" outcome of an HMAC or
    /// envelope verification, as opposed to a malformed-input error.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::HmacVerificationFailed | CryptoError::InvalidEnvelope(_)
        )
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoError::EncodingError(format!("base64 decode error: {err}"))
    }
}

impl From<hex::FromHexError> for CryptoError {
    fn from(err: hex::FromHexError) -> Self {
        CryptoError::EncodingError(format!("hex decode error: {err}"))
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::SerializationError(format!("JSON error: {err}"))
    }
}

impl From<ring::error::Unspecified> for CryptoError {
    fn from(_err: ring::error::Unspecified) -> Self {
        CryptoError::InternalError("ring cryptography error".to_string())
    }
}

impl From<aes_gcm::Error> for CryptoError {
    fn from(err: aes_gcm::Error) -> Self {
        CryptoError::EncryptionFailed(format!("AES-GCM error: {err:?}"))
    }
}

/// Convenience macro for creating crypto errors.
#[macro_export]
macro_rules! crypto_error {
    ($kind:ident, $msg:expr) => {
        $crate::error::CryptoError::$kind($msg.to_string())
    };
    ($kind:ident, $fmt:expr, $($arg:tt)*) => {
        $crate::error::CryptoError::$kind(format!($fmt, $($arg)*))
    };
}
