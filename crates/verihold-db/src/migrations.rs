//! Forward-only schema migration engine (spec §4.7).
//!
//! A fixed, ordered list of migrations identified by a stable string id
//! (e.g. `"00001-CreateRealms"`); new migrations only ever append. Each
//! migration runs inside one transaction, alongside an optional Rust-level
//! data backfill for the handful of migrations that need more than plain
//! SQL (hashing existing plaintext values, folding a legacy boolean into a
//! bitmask). Backfill failures abort the migration's transaction.

use crate::error::{DbError, DbResult};
use crate::pool::Pool;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use verihold_core::permissions::Permission;
use verihold_crypto::hmac::RollingKeys;

/// Collaborators a backfill may need that aren't available as plain SQL —
/// the rolling HMAC keys used to hash values that predate this schema.
#[derive(Debug, Clone, Default)]
pub struct MigrationContext {
    /// Current `APIKeyDatabaseHMAC` key, used by the API-key hashing
    /// backfill (migration `00019`).
    pub api_key_database_hmac_key: Vec<u8>,
}

type BackfillFuture<'c> = Pin<Box<dyn Future<Output = DbResult<()>> + Send + 'c>>;

/// A Rust-level data migration step run inside the owning migration's
/// transaction, after its `up` SQL.
pub type BackfillFn =
    for<'c> fn(&'c mut Transaction<'_, Postgres>, &'c MigrationContext) -> BackfillFuture<'c>;

/// One schema change plus its rollback and optional backfill.
#[derive(Clone)]
pub struct Migration {
    /// Stable, fixed identifier. Order in the overall list — not the
    /// string's lexical order — determines apply/rollback sequencing.
    pub id: &'static str,
    /// SQL executed when applying this migration.
    pub up: &'static str,
    /// SQL executed when rolling this migration back.
    pub down: &'static str,
    /// Optional Rust-level backfill run after `up`, in the same
    /// transaction.
    pub backfill: Option<BackfillFn>,
}

impl Migration {
    const fn new(id: &'static str, up: &'static str, down: &'static str) -> Self {
        Self { id, up, down, backfill: None }
    }

    const fn with_backfill(mut self, backfill: BackfillFn) -> Self {
        self.backfill = Some(backfill);
        self
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration").field("id", &self.id).finish()
    }
}

/// A row of the `_migrations` tracking table.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub id: String,
    pub applied_at: DateTime<Utc>,
}

/// Drives the ordered migration list against a pool.
pub struct MigrationManager {
    pool: PgPool,
}

impl MigrationManager {
    /// Build a manager over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// Create the `_migrations` tracking table if it doesn't exist.
    pub async fn init(&self) -> DbResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DbError::MigrationError(format!("failed to create migrations table: {e}")))?;

        Ok(())
    }

    /// Ids of every applied migration, in no particular order.
    pub async fn applied_ids(&self) -> DbResult<HashSet<String>> {
        let rows = sqlx::query("SELECT id FROM _migrations")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get::<String, _>("id")).collect())
    }

    /// Every applied migration with its timestamp, ordered by apply time.
    pub async fn applied_migrations(&self) -> DbResult<Vec<AppliedMigration>> {
        let rows = sqlx::query("SELECT id, applied_at FROM _migrations ORDER BY applied_at")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| AppliedMigration { id: row.get("id"), applied_at: row.get("applied_at") })
            .collect())
    }

    /// Apply one migration: run its `up` SQL, then its backfill (if any),
    /// then record it — all in one transaction.
    pub async fn apply(&self, migration: &Migration, ctx: &MigrationContext) -> DbResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::MigrationError(format!("failed to start transaction: {e}")))?;

        if !migration.up.trim().is_empty() {
            sqlx::query(migration.up).execute(&mut *tx).await.map_err(|e| {
                DbError::MigrationError(format!("failed to apply {}: {e}", migration.id))
            })?;
        }

        if let Some(backfill) = migration.backfill {
            backfill(&mut tx, ctx).await.map_err(|e| {
                DbError::MigrationError(format!("backfill failed for {}: {e}", migration.id))
            })?;
        }

        sqlx::query("INSERT INTO _migrations (id) VALUES ($1)")
            .bind(migration.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::MigrationError(format!("failed to record {}: {e}", migration.id)))?;

        tx.commit()
            .await
            .map_err(|e| DbError::MigrationError(format!("failed to commit {}: {e}", migration.id)))?;

        Ok(())
    }

    /// Roll one migration back: run its `down` SQL, then remove its record.
    pub async fn rollback(&self, migration: &Migration) -> DbResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::MigrationError(format!("failed to start transaction: {e}")))?;

        if !migration.down.trim().is_empty() {
            sqlx::query(migration.down).execute(&mut *tx).await.map_err(|e| {
                DbError::MigrationError(format!("failed to roll back {}: {e}", migration.id))
            })?;
        }

        sqlx::query("DELETE FROM _migrations WHERE id = $1")
            .bind(migration.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                DbError::MigrationError(format!("failed to remove record for {}: {e}", migration.id))
            })?;

        tx.commit().await.map_err(|e| {
            DbError::MigrationError(format!("failed to commit rollback of {}: {e}", migration.id))
        })?;

        Ok(())
    }

    /// Apply every unapplied migration in `migrations`, in list order.
    pub async fn migrate(&self, migrations: &[Migration], ctx: &MigrationContext) -> DbResult<()> {
        self.init().await?;
        let applied = self.applied_ids().await?;

        for migration in migrations {
            if !applied.contains(migration.id) {
                tracing::info!(migration = migration.id, "applying migration");
                self.apply(migration, ctx).await?;
            }
        }

        Ok(())
    }

    /// Apply or roll back so that exactly the migrations up to and
    /// including `target_id` are applied.
    pub async fn migrate_to(
        &self,
        migrations: &[Migration],
        target_id: &str,
        ctx: &MigrationContext,
    ) -> DbResult<()> {
        self.init().await?;
        let target_index = Self::index_of(migrations, target_id)?;
        let applied = self.applied_ids().await?;
        let current_index = Self::highest_applied_index(migrations, &applied);

        if target_index as i64 > current_index {
            for migration in &migrations[(current_index + 1) as usize..=target_index] {
                self.apply(migration, ctx).await?;
            }
        } else if (target_index as i64) < current_index {
            for migration in migrations[(target_index + 1)..=(current_index as usize)].iter().rev() {
                self.rollback(migration).await?;
            }
        }

        Ok(())
    }

    /// Roll back every applied migration after `target_id`, leaving
    /// `target_id` itself applied.
    pub async fn rollback_to(&self, migrations: &[Migration], target_id: &str) -> DbResult<()> {
        self.init().await?;
        let target_index = Self::index_of(migrations, target_id)?;
        let applied = self.applied_ids().await?;
        let current_index = Self::highest_applied_index(migrations, &applied);

        if (target_index as i64) < current_index {
            for migration in migrations[(target_index + 1)..=(current_index as usize)].iter().rev() {
                self.rollback(migration).await?;
            }
        }

        Ok(())
    }

    fn index_of(migrations: &[Migration], id: &str) -> DbResult<usize> {
        migrations
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| DbError::MigrationError(format!("unknown migration id: {id}")))
    }

    fn highest_applied_index(migrations: &[Migration], applied: &HashSet<String>) -> i64 {
        migrations
            .iter()
            .enumerate()
            .filter(|(_, m)| applied.contains(m.id))
            .map(|(i, _)| i as i64)
            .max()
            .unwrap_or(-1)
    }
}

async fn hash_existing_api_keys(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &MigrationContext,
) -> DbResult<()> {
    let keys = RollingKeys::new(&[ctx.api_key_database_hmac_key.clone()])
        .map_err(|e| DbError::MigrationError(format!("invalid api key hmac key: {e}")))?;

    let rows = sqlx::query("SELECT id, api_key FROM authorized_apps WHERE api_key_hash IS NULL")
        .fetch_all(&mut **tx)
        .await?;

    for row in rows {
        let id: i64 = row.get("id");
        let plaintext: String = row.get("api_key");
        let hash = keys.sign(plaintext.as_bytes());
        sqlx::query("UPDATE authorized_apps SET api_key_hash = $1 WHERE id = $2")
            .bind(hash)
            .bind(id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

async fn fold_legacy_admin_booleans(
    tx: &mut Transaction<'_, Postgres>,
    _ctx: &MigrationContext,
) -> DbResult<()> {
    let rows = sqlx::query("SELECT id, is_admin FROM memberships WHERE permissions IS NULL")
        .fetch_all(&mut **tx)
        .await?;

    for row in rows {
        let id: i64 = row.get("id");
        let is_admin: bool = row.get("is_admin");
        let permissions = Permission::from_legacy_admin_flag(is_admin).bits();
        sqlx::query("UPDATE memberships SET permissions = $1 WHERE id = $2")
            .bind(permissions)
            .bind(id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

fn backfill_hash_existing_api_keys<'c>(
    tx: &'c mut Transaction<'_, Postgres>,
    ctx: &'c MigrationContext,
) -> BackfillFuture<'c> {
    Box::pin(hash_existing_api_keys(tx, ctx))
}

fn backfill_fold_legacy_admin_booleans<'c>(
    tx: &'c mut Transaction<'_, Postgres>,
    ctx: &'c MigrationContext,
) -> BackfillFuture<'c> {
    Box::pin(fold_legacy_admin_booleans(tx, ctx))
}

/// The fixed, ordered migration list. Append only — never reorder or
/// remove an entry once shipped.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration::new(
            "00001-CreateRealms",
            r#"
            CREATE TABLE realms (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                region_code TEXT,
                code_length INT NOT NULL DEFAULT 8,
                code_duration_seconds BIGINT NOT NULL DEFAULT 900,
                long_code_length INT NOT NULL DEFAULT 16,
                long_code_duration_seconds BIGINT NOT NULL DEFAULT 86400,
                sms_text_template TEXT NOT NULL DEFAULT 'Your verification code is [code]',
                allowed_test_types INT NOT NULL DEFAULT 0,
                certificate_issuer TEXT,
                certificate_audience TEXT,
                abuse_prevention_enabled BOOLEAN NOT NULL DEFAULT false,
                abuse_prevention_limit INT NOT NULL DEFAULT 0,
                mfa_mode TEXT NOT NULL DEFAULT 'optional',
                email_verification_mode TEXT NOT NULL DEFAULT 'optional',
                use_system_sms_config BOOLEAN NOT NULL DEFAULT true,
                use_system_email_config BOOLEAN NOT NULL DEFAULT true,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            );
            CREATE UNIQUE INDEX idx_realms_name ON realms (lower(name)) WHERE deleted_at IS NULL;
            CREATE UNIQUE INDEX idx_realms_region_code ON realms (lower(region_code))
                WHERE deleted_at IS NULL AND region_code IS NOT NULL;
            "#,
            r#"DROP TABLE IF EXISTS realms;"#,
        ),
        Migration::new(
            "00002-CreateAuthorizedApps",
            r#"
            CREATE TABLE authorized_apps (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                name TEXT NOT NULL,
                api_key TEXT NOT NULL,
                api_key_preview TEXT NOT NULL DEFAULT '',
                api_key_type TEXT NOT NULL DEFAULT 'device',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            );
            CREATE UNIQUE INDEX idx_authorized_apps_realm_name ON authorized_apps (realm_id, name)
                WHERE deleted_at IS NULL;
            CREATE INDEX idx_authorized_apps_api_key ON authorized_apps (api_key);
            "#,
            r#"DROP TABLE IF EXISTS authorized_apps;"#,
        ),
        Migration::new(
            "00003-CreateVerificationCodes",
            r#"
            CREATE TABLE verification_codes (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                code BYTEA NOT NULL DEFAULT '\x'::bytea,
                long_code BYTEA NOT NULL DEFAULT '\x'::bytea,
                claimed BOOLEAN NOT NULL DEFAULT false,
                test_type INT NOT NULL,
                symptom_date DATE,
                test_date DATE,
                expires_at TIMESTAMPTZ NOT NULL,
                long_expires_at TIMESTAMPTZ NOT NULL,
                issuing_user_id BIGINT,
                issuing_app_id BIGINT REFERENCES authorized_apps(id),
                issuing_external_id TEXT,
                user_report_id BIGINT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE UNIQUE INDEX idx_verification_codes_realm_code ON verification_codes (realm_id, code)
                WHERE code <> '\x'::bytea;
            CREATE UNIQUE INDEX idx_verification_codes_realm_long_code
                ON verification_codes (realm_id, long_code) WHERE long_code <> '\x'::bytea;
            "#,
            r#"DROP TABLE IF EXISTS verification_codes;"#,
        ),
        Migration::new(
            "00004-CreateTokens",
            r#"
            CREATE TABLE tokens (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                token_id TEXT NOT NULL UNIQUE,
                test_type INT NOT NULL,
                symptom_date DATE,
                test_date DATE,
                used BOOLEAN NOT NULL DEFAULT false,
                expires_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
            r#"DROP TABLE IF EXISTS tokens;"#,
        ),
        Migration::new(
            "00005-CreateUserReports",
            r#"
            CREATE TABLE user_reports (
                id BIGSERIAL PRIMARY KEY,
                phone_hash BYTEA NOT NULL UNIQUE,
                nonce BYTEA NOT NULL,
                nonce_required BOOLEAN NOT NULL DEFAULT true,
                code_claimed BOOLEAN NOT NULL DEFAULT false,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            ALTER TABLE verification_codes
                ADD CONSTRAINT fk_verification_codes_user_report
                FOREIGN KEY (user_report_id) REFERENCES user_reports(id) ON DELETE SET NULL;
            "#,
            r#"
            ALTER TABLE verification_codes DROP CONSTRAINT IF EXISTS fk_verification_codes_user_report;
            DROP TABLE IF EXISTS user_reports;
            "#,
        ),
        Migration::new(
            "00006-CreateSecrets",
            r#"
            CREATE TABLE secrets (
                id BIGSERIAL PRIMARY KEY,
                type TEXT NOT NULL,
                reference TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT true,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            );
            CREATE INDEX idx_secrets_type_active ON secrets (type, active, created_at);
            "#,
            r#"DROP TABLE IF EXISTS secrets;"#,
        ),
        Migration::new(
            "00007-CreateMemberships",
            r#"
            CREATE TABLE memberships (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                is_admin BOOLEAN NOT NULL DEFAULT false,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (user_id, realm_id)
            );
            "#,
            r#"DROP TABLE IF EXISTS memberships;"#,
        ),
        Migration::new(
            "00008-CreateSigningKeys",
            r#"
            CREATE TABLE signing_keys (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                key_id TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT true,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
            r#"DROP TABLE IF EXISTS signing_keys;"#,
        ),
        Migration::new(
            "00009-CreateSMSConfigs",
            r#"
            CREATE TABLE sms_configs (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT REFERENCES realms(id),
                provider TEXT NOT NULL,
                twilio_account_sid TEXT,
                twilio_auth_token_ciphertext TEXT,
                twilio_from_number TEXT,
                is_system BOOLEAN NOT NULL DEFAULT false,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
            r#"DROP TABLE IF EXISTS sms_configs;"#,
        ),
        Migration::new(
            "00010-CreateEmailConfigs",
            r#"
            CREATE TABLE email_configs (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT REFERENCES realms(id),
                provider TEXT NOT NULL,
                smtp_host TEXT,
                smtp_account_ciphertext TEXT,
                is_system BOOLEAN NOT NULL DEFAULT false,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
            r#"DROP TABLE IF EXISTS email_configs;"#,
        ),
        Migration::new(
            "00011-CreateAuditEntries",
            r#"
            CREATE TABLE audit_entries (
                id BIGSERIAL PRIMARY KEY,
                actor_id TEXT,
                action TEXT NOT NULL,
                target_id TEXT NOT NULL,
                realm_id BIGINT,
                diff JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX idx_audit_entries_realm_id ON audit_entries (realm_id);
            CREATE INDEX idx_audit_entries_actor_id ON audit_entries (actor_id);
            CREATE INDEX idx_audit_entries_target_id ON audit_entries (target_id);
            CREATE INDEX idx_audit_entries_created_at ON audit_entries (created_at);
            "#,
            r#"DROP TABLE IF EXISTS audit_entries;"#,
        ),
        Migration::new(
            "00012-CreateLockStatus",
            r#"
            CREATE TABLE lock_status (
                id BIGSERIAL PRIMARY KEY,
                type TEXT NOT NULL UNIQUE,
                generation BIGINT NOT NULL DEFAULT 0,
                not_before TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
            r#"DROP TABLE IF EXISTS lock_status;"#,
        ),
        Migration::new(
            "00013-CreateStatsTables",
            r#"
            CREATE TABLE realm_stats (
                date DATE NOT NULL,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                codes_issued BIGINT NOT NULL DEFAULT 0,
                codes_claimed BIGINT NOT NULL DEFAULT 0,
                codes_invalid BIGINT NOT NULL DEFAULT 0,
                tokens_claimed BIGINT NOT NULL DEFAULT 0,
                tokens_invalid BIGINT NOT NULL DEFAULT 0,
                user_reports_issued BIGINT NOT NULL DEFAULT 0,
                user_reports_claimed BIGINT NOT NULL DEFAULT 0,
                claim_age_buckets BIGINT[] NOT NULL DEFAULT '{0,0,0,0,0,0,0,0,0,0,0}',
                claim_age_mean_seconds DOUBLE PRECISION NOT NULL DEFAULT 0,
                claim_age_sample_count BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (date, realm_id)
            );
            CREATE TABLE authorized_app_stats (
                date DATE NOT NULL,
                authorized_app_id BIGINT NOT NULL REFERENCES authorized_apps(id),
                codes_issued BIGINT NOT NULL DEFAULT 0,
                codes_claimed BIGINT NOT NULL DEFAULT 0,
                codes_invalid BIGINT NOT NULL DEFAULT 0,
                tokens_claimed BIGINT NOT NULL DEFAULT 0,
                tokens_invalid BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (date, authorized_app_id)
            );
            CREATE TABLE user_stats (
                date DATE NOT NULL,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                user_id BIGINT NOT NULL,
                codes_issued BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (date, realm_id, user_id)
            );
            CREATE TABLE external_issuer_stats (
                date DATE NOT NULL,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                issuer_id TEXT NOT NULL,
                codes_issued BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (date, realm_id, issuer_id)
            );
            CREATE TABLE key_server_stats (
                date DATE PRIMARY KEY,
                requests BIGINT NOT NULL DEFAULT 0,
                errors BIGINT NOT NULL DEFAULT 0
            );
            "#,
            r#"
            DROP TABLE IF EXISTS key_server_stats;
            DROP TABLE IF EXISTS external_issuer_stats;
            DROP TABLE IF EXISTS user_stats;
            DROP TABLE IF EXISTS authorized_app_stats;
            DROP TABLE IF EXISTS realm_stats;
            "#,
        ),
        Migration::new(
            "00014-CreateRealmChaffEvents",
            r#"
            CREATE TABLE realm_chaff_events (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
            r#"DROP TABLE IF EXISTS realm_chaff_events;"#,
        ),
        Migration::new(
            "00015-CreateSMSFromNumbers",
            r#"
            CREATE TABLE sms_from_numbers (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                phone_number TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
            r#"DROP TABLE IF EXISTS sms_from_numbers;"#,
        ),
        Migration::new(
            "00016-CreateSMSSigningKeys",
            r#"
            CREATE TABLE sms_signing_keys (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                key_id TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT true,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
            r#"DROP TABLE IF EXISTS sms_signing_keys;"#,
        ),
        Migration::new(
            "00017-CreateTokenSigningKeys",
            r#"
            CREATE TABLE token_signing_keys (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                key_id TEXT NOT NULL,
                active BOOLEAN NOT NULL DEFAULT true,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            "#,
            r#"DROP TABLE IF EXISTS token_signing_keys;"#,
        ),
        Migration::new(
            "00018-CreateMobileApps",
            r#"
            CREATE TABLE mobile_apps (
                id BIGSERIAL PRIMARY KEY,
                realm_id BIGINT NOT NULL REFERENCES realms(id),
                name TEXT NOT NULL,
                os TEXT NOT NULL,
                app_store_id TEXT,
                sha256_cert_fingerprints TEXT[] NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            );
            "#,
            r#"DROP TABLE IF EXISTS mobile_apps;"#,
        ),
        Migration::new(
            "00019-HashExistingAPIKeys",
            r#"ALTER TABLE authorized_apps ADD COLUMN api_key_hash BYTEA;"#,
            r#"ALTER TABLE authorized_apps DROP COLUMN IF EXISTS api_key_hash;"#,
        )
        .with_backfill(backfill_hash_existing_api_keys),
        Migration::new(
            "00020-SwapAPIKeyColumnToHash",
            r#"
            ALTER TABLE authorized_apps ALTER COLUMN api_key_hash SET NOT NULL;
            ALTER TABLE authorized_apps DROP COLUMN api_key;
            ALTER TABLE authorized_apps RENAME COLUMN api_key_hash TO api_key;
            "#,
            r#"
            ALTER TABLE authorized_apps RENAME COLUMN api_key TO api_key_hash;
            ALTER TABLE authorized_apps ADD COLUMN api_key TEXT;
            "#,
        ),
        Migration::new(
            "00021-AddVerificationCodeUUIDs",
            r#"
            ALTER TABLE verification_codes ADD COLUMN uuid UUID;
            UPDATE verification_codes SET uuid = gen_random_uuid() WHERE uuid IS NULL;
            ALTER TABLE verification_codes ALTER COLUMN uuid SET NOT NULL;
            CREATE UNIQUE INDEX idx_verification_codes_uuid ON verification_codes (uuid);
            "#,
            r#"
            DROP INDEX IF EXISTS idx_verification_codes_uuid;
            ALTER TABLE verification_codes DROP COLUMN IF EXISTS uuid;
            "#,
        ),
        Migration::new(
            "00022-DedupeRealmRegionCodes",
            r#"
            WITH duplicates AS (
                SELECT id, region_code,
                    ROW_NUMBER() OVER (PARTITION BY lower(region_code) ORDER BY id) AS rn
                FROM realms
                WHERE region_code IS NOT NULL
            )
            UPDATE realms
            SET region_code = realms.region_code || '-' || duplicates.rn
            FROM duplicates
            WHERE realms.id = duplicates.id AND duplicates.rn > 1;
            "#,
            r#""#,
        ),
        Migration::new(
            "00023-FoldLegacyAdminBooleans",
            r#"ALTER TABLE memberships ADD COLUMN permissions INT;"#,
            r#"ALTER TABLE memberships DROP COLUMN IF EXISTS permissions;"#,
        )
        .with_backfill(backfill_fold_legacy_admin_booleans),
        Migration::new(
            "00024-DropLegacyIsAdmin",
            r#"
            ALTER TABLE memberships ALTER COLUMN permissions SET NOT NULL;
            ALTER TABLE memberships DROP COLUMN is_admin;
            "#,
            r#"ALTER TABLE memberships ADD COLUMN is_admin BOOLEAN NOT NULL DEFAULT false;"#,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_ids_are_unique_and_fixed() {
        let migrations = all_migrations();
        let mut seen = HashSet::new();
        for migration in &migrations {
            assert!(seen.insert(migration.id), "duplicate migration id: {}", migration.id);
        }
    }

    #[test]
    fn data_backfill_migrations_declare_a_backfill_fn() {
        let migrations = all_migrations();
        let hash_keys = migrations
            .iter()
            .find(|m| m.id == "00019-HashExistingAPIKeys")
            .unwrap();
        assert!(hash_keys.backfill.is_some());

        let fold_admin = migrations
            .iter()
            .find(|m| m.id == "00023-FoldLegacyAdminBooleans")
            .unwrap();
        assert!(fold_admin.backfill.is_some());
    }

    #[test]
    fn index_of_rejects_unknown_id() {
        let migrations = all_migrations();
        assert!(MigrationManager::index_of(&migrations, "not-a-real-id").is_err());
    }

    #[test]
    fn highest_applied_index_with_no_matches_is_negative() {
        let migrations = all_migrations();
        let applied = HashSet::new();
        assert_eq!(MigrationManager::highest_applied_index(&migrations, &applied), -1);
    }

    #[test]
    fn highest_applied_index_finds_furthest_applied_migration() {
        let migrations = all_migrations();
        let mut applied = HashSet::new();
        applied.insert("00001-CreateRealms".to_string());
        applied.insert("00003-CreateVerificationCodes".to_string());
        assert_eq!(MigrationManager::highest_applied_index(&migrations, &applied), 2);
    }
}
