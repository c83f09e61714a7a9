//! # Verihold Crypto
//!
//! Rolling-key HMAC, the API-key envelope codec, and the pluggable
//! encryption/secret/signing-key capability traits that back the Verihold
//! verification-code persistence layer.
//!
//! ## Scope
//!
//! - **Rolling-key HMAC** (`hmac`): sign with the primary key, verify
//!   against the whole configured set.
//! - **API-key envelopes** (`apikey`): issuance and dual-path (enveloped /
//!   legacy) lookup support.
//! - **Column-level envelope encryption** (`envelope`, `keymanager`): a
//!   `KeyManager`-backed adapter with a plaintext/ciphertext memo so
//!   unchanged secret columns don't get re-encrypted on every save.
//! - **`SecretManager`** (`secretmanager`) and **`SigningKeyManager`**
//!   (`signingkeymanager`): named-secret and named-signing-purpose
//!   resolution, with in-memory (and, for secrets, filesystem-backed)
//!   implementations for tests and local development.
//! - **`Cacher`** (`cacher`): a small TTL cache capability trait with an
//!   in-memory implementation.
//!
//! None of these traits are implemented against a real cloud KMS, secret
//! manager, or cache here — those drivers are explicitly out of scope
//! (spec Non-goals); only the interfaces a caller needs to plug one in are.
//!
//! ## Quick start
//!
//! ```ignore
//! use verihold_crypto::hmac::RollingKeys;
//! use verihold_crypto::apikey;
//!
//! let signature_keys = RollingKeys::new(&[b"current-signing-key".to_vec()])?;
//! let database_keys = RollingKeys::new(&[b"current-index-key".to_vec()])?;
//!
//! let issued = apikey::issue("realm-123", &signature_keys, &database_keys);
//! let presented = apikey::parse(&issued.envelope)?;
//! assert!(apikey::verify_envelope_signature(&presented, &signature_keys));
//! # Ok::<(), verihold_crypto::error::CryptoError>(())
//! ```

#![warn(missing_docs)]

pub mod apikey;
pub mod cacher;
pub mod envelope;
pub mod error;
pub mod hmac;
pub mod keymanager;
pub mod secretmanager;
pub mod signingkeymanager;

pub use error::{CryptoError, CryptoResult};

/// Convenient imports for consumers of this crate.
pub mod prelude {
    //! Prelude module for convenient imports.
    //!
    //! ```ignore
    //! use verihold_crypto::prelude::*;
    //! ```

    pub use crate::apikey::{self, IssuedApiKey, PresentedApiKey};
    pub use crate::cacher::{Cacher, InMemoryCacher};
    pub use crate::envelope::{ColumnCipher, EncryptionMemo};
    pub use crate::error::{CryptoError, CryptoResult};
    pub use crate::hmac::RollingKeys;
    pub use crate::keymanager::{InMemoryKeyManager, KeyManager};
    pub use crate::secretmanager::{FilesystemSecretManager, InMemorySecretManager, SecretManager};
    pub use crate::signingkeymanager::{InMemorySigningKeyManager, SigningKeyManager};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the crate with `tracing`-based structured logging.
pub fn init_with_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("verihold_crypto=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    tracing::info!("Verihold Crypto v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
