//! Environment-driven configuration (spec §6).
//!
//! Loaded via the `config` crate layered over a `.env` file (`dotenvy`), the
//! way `meridian-server` wires up its own config: a struct of typed fields
//! populated from env vars, with `Config::builder().add_source(Environment)`
//! rather than hand-rolled `std::env::var` calls scattered through the crate.

use crate::error::{DbError, DbResult};
use crate::pool::PoolConfig;
use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;

/// External collaborator configuration named in spec §6.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Rolling keys used to HMAC the opaque part of an API key before
    /// storage. Element 0 is current.
    #[serde(default)]
    pub api_key_database_hmac: Vec<String>,

    /// Rolling keys used to sign/verify API-key envelopes. Element 0 is
    /// current.
    #[serde(default)]
    pub api_key_signature_hmac: Vec<String>,

    /// Rolling keys used to HMAC verification codes before storage.
    #[serde(default)]
    pub verification_code_database_hmac: Vec<String>,

    /// In-memory read cache lifetime, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Identifier passed to a `KeyManager` for column encryption.
    #[serde(default)]
    pub encryption_key: String,

    /// Ring name for realm-scoped certificate signing keys.
    #[serde(default)]
    pub certificate_signing_key_ring: String,

    /// Enables driver-level SQL statement logging.
    #[serde(default)]
    pub debug: bool,

    /// Connection pool configuration.
    #[serde(flatten)]
    pub pool: PoolConfigEnv,
}

/// The [`PoolConfig`] fields sourced from the environment, using names that
/// match the `config::Environment` default casing.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfigEnv {
    #[serde(default = "default_host")]
    pub db_host: String,
    #[serde(default = "default_port")]
    pub db_port: u16,
    #[serde(default = "default_database")]
    pub db_name: String,
    #[serde(default = "default_username")]
    pub db_username: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,
}

fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_database() -> String {
    "verihold".to_string()
}
fn default_username() -> String {
    "postgres".to_string()
}
fn default_max_connections() -> u32 {
    10
}

impl AppConfig {
    /// Load configuration from the process environment, first merging in a
    /// `.env` file if one is present (ignored if absent — dotenvy only
    /// fails loudly on a malformed file).
    pub fn load() -> DbResult<Self> {
        match dotenvy::dotenv() {
            Ok(_) | Err(dotenvy::Error::Io(_)) => {}
            Err(e) => return Err(DbError::ConfigError(format!("malformed .env file: {e}"))),
        }

        let config = Config::builder()
            .add_source(Environment::default().separator("__").try_parsing(true))
            .build()
            .map_err(|e| DbError::ConfigError(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| DbError::ConfigError(e.to_string()))
    }

    /// The configured cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Build a [`PoolConfig`] from the pool-related environment fields.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::builder()
            .host(&self.pool.db_host)
            .port(self.pool.db_port)
            .database(&self.pool.db_name)
            .username(&self.pool.db_username)
            .password(&self.pool.db_password)
            .max_connections(self.pool.db_max_connections)
            .build()
    }

    /// Each configured key, decoded from its raw string form to bytes.
    ///
    /// Keys are read as opaque UTF-8 strings from the environment; the raw
    /// bytes of the string are the HMAC key material, matching the rolling
    /// key sets described in spec §9.
    pub fn api_key_database_hmac_bytes(&self) -> Vec<Vec<u8>> {
        self.api_key_database_hmac.iter().map(|k| k.clone().into_bytes()).collect()
    }

    /// See [`Self::api_key_database_hmac_bytes`].
    pub fn api_key_signature_hmac_bytes(&self) -> Vec<Vec<u8>> {
        self.api_key_signature_hmac.iter().map(|k| k.clone().into_bytes()).collect()
    }

    /// See [`Self::api_key_database_hmac_bytes`].
    pub fn verification_code_database_hmac_bytes(&self) -> Vec<Vec<u8>> {
        self.verification_code_database_hmac.iter().map(|k| k.clone().into_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_falls_back_to_defaults() {
        let config = AppConfig {
            api_key_database_hmac: vec![],
            api_key_signature_hmac: vec![],
            verification_code_database_hmac: vec![],
            cache_ttl_secs: default_cache_ttl_secs(),
            encryption_key: String::new(),
            certificate_signing_key_ring: String::new(),
            debug: false,
            pool: PoolConfigEnv {
                db_host: default_host(),
                db_port: default_port(),
                db_name: default_database(),
                db_username: default_username(),
                db_password: String::new(),
                db_max_connections: default_max_connections(),
            },
        };

        let pool = config.pool_config();
        assert_eq!(pool.host, "localhost");
        assert_eq!(pool.database, "verihold");
    }

    #[test]
    fn cache_ttl_converts_seconds_to_duration() {
        let config = AppConfig {
            api_key_database_hmac: vec![],
            api_key_signature_hmac: vec![],
            verification_code_database_hmac: vec![],
            cache_ttl_secs: 120,
            encryption_key: String::new(),
            certificate_signing_key_ring: String::new(),
            debug: false,
            pool: PoolConfigEnv {
                db_host: default_host(),
                db_port: default_port(),
                db_name: default_database(),
                db_username: default_username(),
                db_password: String::new(),
                db_max_connections: default_max_connections(),
            },
        };

        assert_eq!(config.cache_ttl(), Duration::from_secs(120));
    }

    #[test]
    fn hmac_key_strings_convert_to_raw_bytes() {
        let config = AppConfig {
            api_key_database_hmac: vec!["key-one".to_string(), "key-two".to_string()],
            api_key_signature_hmac: vec![],
            verification_code_database_hmac: vec![],
            cache_ttl_secs: default_cache_ttl_secs(),
            encryption_key: String::new(),
            certificate_signing_key_ring: String::new(),
            debug: false,
            pool: PoolConfigEnv {
                db_host: default_host(),
                db_port: default_port(),
                db_name: default_database(),
                db_username: default_username(),
                db_password: String::new(),
                db_max_connections: default_max_connections(),
            },
        };

        assert_eq!(
            config.api_key_database_hmac_bytes(),
            vec![b"key-one".to_vec(), b"key-two".to_vec()]
        );
    }
}
