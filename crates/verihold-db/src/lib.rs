//! Verihold database layer
//!
//! Postgres persistence for the Verihold verification-code platform:
//! connection pooling, a forward-only migration engine, and per-component
//! repositories for realms, authorized apps, verification codes, tokens,
//! user reports, secrets, named locks, stats, and the audit log.
//!
//! # Features
//!
//! - **Connection pool management**: configurable pooling with health checks
//! - **Migration engine**: ordered, fixed-id, forward-only migrations with
//!   transactional data backfills
//! - **Repository pattern**: one repository per component, each built on
//!   `sqlx::query_as` against a shared `PgPool`
//! - **Transaction support**: row-locked claim/lock transitions via
//!   `sqlx::Transaction`, committed or rolled back per operation
//! - **Environment-driven configuration**
//!
//! # Example
//!
//! ```rust,no_run
//! use verihold_db::{init_database, migrations::MigrationContext, Pool, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PoolConfig::builder()
//!         .host("localhost")
//!         .database("verihold")
//!         .username("postgres")
//!         .password("password")
//!         .max_connections(20)
//!         .build();
//!
//!     let pool = Pool::new(config).await?;
//!     init_database(&pool, &MigrationContext::default()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod repo;

pub use config::AppConfig;
pub use error::{DbError, DbResult};
pub use migrations::{all_migrations, Migration, MigrationContext, MigrationManager};
pub use models::{PaginatedResponse, Pagination};
pub use pool::{HealthStatus, Pool, PoolConfig, PoolStats};

/// Commonly used types, for a single `use verihold_db::prelude::*`.
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::error::{DbError, DbResult};
    pub use crate::migrations::{MigrationContext, MigrationManager};
    pub use crate::models::{PaginatedResponse, Pagination};
    pub use crate::pool::Pool;
    pub use crate::repo::{
        audit::{AuditRepository, AuditWriter},
        authorized_app::AuthorizedAppRepository,
        email_config::EmailConfigRepository,
        named_lock::NamedLockRepository,
        realm::RealmRepository,
        secret::SecretRepository,
        sms_config::SmsConfigRepository,
        stats::StatsRepository,
        token::TokenRepository,
        user_report::UserReportRepository,
        verification_code::VerificationCodeRepository,
    };
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bring a fresh database up to the latest schema (spec §4.7 `Migrate()`).
///
/// # Example
///
/// ```rust,no_run
/// use verihold_db::{init_database, migrations::MigrationContext, Pool, PoolConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = Pool::new(PoolConfig::default()).await?;
///     init_database(&pool, &MigrationContext::default()).await?;
///     Ok(())
/// }
/// ```
pub async fn init_database(pool: &Pool, ctx: &migrations::MigrationContext) -> DbResult<()> {
    let migrator = MigrationManager::new(pool);
    migrator.init().await?;
    migrator.migrate(&migrations::all_migrations(), ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
