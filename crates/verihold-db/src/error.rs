//! Error taxonomy for the Verihold persistence layer (spec §7).
//!
//! Validation and domain errors (a code already used, a token expired) are
//! surfaced unchanged so a caller can branch on them; driver errors are
//! wrapped with context but keep `#[from]` access to the root `sqlx::Error`
//! so `is_retryable`/`is_not_found` can inspect it.

use thiserror::Error;
use verihold_core::error::ValidationErrors;
use verihold_crypto::error::CryptoError;

/// Result type alias for persistence-layer operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors raised by the Verihold persistence layer.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQL execution error.
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    MigrationError(String),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    PoolError(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    TransactionError(String),

    /// The operation was cancelled via its `CancellationToken` before or
    /// during execution (spec §5).
    #[error("operation cancelled")]
    Cancelled,

    /// Generic resource-not-found error, for entities without a more
    /// specific not-found variant of their own.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// A save-time validation hook rejected the entity.
    #[error("validation failed: {0}")]
    ValidationFailed(#[from] ValidationErrors),

    /// No verification code matches the presented value.
    #[error("verification code not found")]
    VerificationCodeNotFound,

    /// The verification code has passed its expiry time.
    #[error("verification code expired")]
    VerificationCodeExpired,

    /// The verification code has already been claimed.
    #[error("verification code already used")]
    VerificationCodeUsed,

    /// The token has passed its expiry time.
    #[error("token expired")]
    TokenExpired,

    /// The token has already been claimed.
    #[error("token already used")]
    TokenUsed,

    /// The subject presented at claim time does not match the subject the
    /// token was issued for.
    #[error("token metadata mismatch")]
    TokenMetadataMismatch,

    /// The realm does not accept the presented test type.
    #[error("unsupported test type: {0}")]
    UnsupportedTestType(String),

    /// A compare-and-swap against a row's generation counter lost the
    /// race (spec §4.4 named lock generation bump).
    #[error("wrong generation: expected {expected}, found {found}")]
    WrongGeneration {
        /// Generation the caller expected to hold the lock at.
        expected: i64,
        /// Generation actually stored.
        found: i64,
    },

    /// No active secret exists for the given name.
    #[error("secret does not exist: {0}")]
    SecretNotExist(String),

    /// No signing key management is configured for a purpose.
    #[error("no signing key management configured for: {0}")]
    NoSigningKeyManagement(String),

    /// A transient failure a caller may retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// UUID error.
    #[error("UUID error: {0}")]
    UuidError(#[from] uuid::Error),

    /// A cryptographic operation (HMAC, envelope encryption, key lookup)
    /// failed.
    #[error("crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,

    /// Generic error.
    #[error("database error: {0}")]
    Generic(String),
}

impl DbError {
    /// Check if this error is a connection-level error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbError::PoolError(_) | DbError::Timeout | DbError::SqlError(_))
    }

    /// Check if this error means "no such row", across every
    /// entity-specific not-found variant.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DbError::NotFound(_) | DbError::VerificationCodeNotFound | DbError::SecretNotExist(_)
        )
    }

    /// Check if this error is retryable (spec §7 propagation rules).
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::SqlError(err) => err.as_database_error().is_none(),
            DbError::PoolError(_) | DbError::Timeout | DbError::Transient(_) => true,
            DbError::CryptoError(e) => e.is_retryable(),
            _ => false,
        }
    }
}
