//! Realm registry (spec §3 `Realm`, §4 "Realm registry"). Realm config is
//! read far more often than it changes, so lookups go through a
//! write-through [`Cacher`] (spec §5): a hit skips Postgres entirely, a
//! miss populates the cache, and a mutating write invalidates the entry
//! before returning.

use crate::error::{DbError, DbResult};
use crate::models::{PaginatedResponse, Pagination, Realm};
use crate::pool::Pool;
use crate::repo::cancellable;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use verihold_core::validation::Validatable;
use verihold_crypto::cacher::Cacher;

/// How long a cached realm lookup is trusted before a fresh read.
const CACHE_TTL: Duration = Duration::from_secs(60);

fn cache_key_id(id: i64) -> String {
    format!("realm:id:{id}")
}

fn cache_key_name(name: &str) -> String {
    format!("realm:name:{}", name.to_lowercase())
}

/// Repository for the `realms` table.
pub struct RealmRepository {
    pool: PgPool,
}

impl RealmRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// Create a realm. Normalizes and validates before saving.
    pub async fn create(&self, mut realm: Realm, token: &CancellationToken) -> DbResult<Realm> {
        realm.normalize();
        realm.validate_result()?;

        cancellable(token, async {
            let created = sqlx::query_as::<_, Realm>(
                r#"
                INSERT INTO realms (
                    name, region_code, code_length, code_duration_seconds,
                    long_code_length, long_code_duration_seconds, sms_text_template,
                    allowed_test_types, certificate_issuer, certificate_audience,
                    abuse_prevention_enabled, abuse_prevention_limit, mfa_mode,
                    email_verification_mode, use_system_sms_config, use_system_email_config
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                RETURNING *
                "#,
            )
            .bind(&realm.name)
            .bind(&realm.region_code)
            .bind(realm.code_length)
            .bind(realm.code_duration_seconds)
            .bind(realm.long_code_length)
            .bind(realm.long_code_duration_seconds)
            .bind(&realm.sms_text_template)
            .bind(realm.allowed_test_types)
            .bind(&realm.certificate_issuer)
            .bind(&realm.certificate_audience)
            .bind(realm.abuse_prevention_enabled)
            .bind(realm.abuse_prevention_limit)
            .bind(&realm.mfa_mode)
            .bind(&realm.email_verification_mode)
            .bind(realm.use_system_sms_config)
            .bind(realm.use_system_email_config)
            .fetch_one(&self.pool)
            .await?;

            Ok(created)
        })
        .await
    }

    /// Find a realm by id, excluding soft-deleted rows. Checks `cache`
    /// before Postgres and populates it on a miss.
    pub async fn find_by_id(
        &self,
        id: i64,
        cache: &Arc<dyn Cacher>,
        token: &CancellationToken,
    ) -> DbResult<Realm> {
        let key = cache_key_id(id);
        if let Some(realm) = read_cached(cache, &key).await {
            return Ok(realm);
        }

        let realm = cancellable(token, async {
            sqlx::query_as::<_, Realm>("SELECT * FROM realms WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("realm {id}")))
        })
        .await?;

        write_cached(cache, &key, &realm).await;
        Ok(realm)
    }

    /// Find a realm by its case-insensitive name. Checks `cache` before
    /// Postgres and populates it on a miss.
    pub async fn find_by_name(
        &self,
        name: &str,
        cache: &Arc<dyn Cacher>,
        token: &CancellationToken,
    ) -> DbResult<Realm> {
        let key = cache_key_name(name);
        if let Some(realm) = read_cached(cache, &key).await {
            return Ok(realm);
        }

        let realm = cancellable(token, async {
            sqlx::query_as::<_, Realm>(
                "SELECT * FROM realms WHERE lower(name) = lower($1) AND deleted_at IS NULL",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("realm {name}")))
        })
        .await?;

        write_cached(cache, &key, &realm).await;
        Ok(realm)
    }

    /// List realms, excluding soft-deleted rows.
    pub async fn list(
        &self,
        pagination: Pagination,
        token: &CancellationToken,
    ) -> DbResult<PaginatedResponse<Realm>> {
        cancellable(token, async {
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM realms WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

            let realms = sqlx::query_as::<_, Realm>(
                "SELECT * FROM realms WHERE deleted_at IS NULL ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            )
            .bind(pagination.limit() as i64)
            .bind(pagination.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

            Ok(PaginatedResponse::new(realms, total as u64, pagination))
        })
        .await
    }

    /// Soft-delete a realm, invalidating its cache entries so a
    /// concurrent reader never observes a cached pre-delete row.
    pub async fn soft_delete(
        &self,
        id: i64,
        cache: &Arc<dyn Cacher>,
        token: &CancellationToken,
    ) -> DbResult<()> {
        let name = self.find_by_id(id, cache, token).await.ok().map(|r| r.name);

        cancellable(token, async {
            sqlx::query("UPDATE realms SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await?;

        cache.delete(&cache_key_id(id)).await;
        if let Some(name) = name {
            cache.delete(&cache_key_name(&name)).await;
        }
        Ok(())
    }

    /// Hard-delete realms soft-deleted for longer than `max_age`, provided
    /// no referents (authorized apps, verification codes) remain.
    pub async fn purge(&self, max_age: chrono::Duration, token: &CancellationToken) -> DbResult<u64> {
        cancellable(token, async {
            let cutoff = chrono::Utc::now() - max_age;
            let result = sqlx::query(
                r#"
                DELETE FROM realms
                WHERE deleted_at IS NOT NULL AND deleted_at < $1
                AND NOT EXISTS (SELECT 1 FROM authorized_apps WHERE realm_id = realms.id)
                AND NOT EXISTS (SELECT 1 FROM verification_codes WHERE realm_id = realms.id)
                "#,
            )
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected())
        })
        .await
    }
}

async fn read_cached(cache: &Arc<dyn Cacher>, key: &str) -> Option<Realm> {
    let bytes = cache.get(key).await?;
    serde_json::from_slice(&bytes).ok()
}

async fn write_cached(cache: &Arc<dyn Cacher>, key: &str, realm: &Realm) {
    if let Ok(bytes) = serde_json::to_vec(realm) {
        cache.set(key, bytes, CACHE_TTL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_repository_holds_no_state_beyond_the_pool_handle() {
        // Compile-time shape check only; exercising queries needs Postgres
        // and belongs in an integration suite.
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RealmRepository>();
    }

    fn sample_realm() -> Realm {
        let now = chrono::Utc::now();
        Realm {
            id: 7,
            name: "acme".to_string(),
            region_code: Some("US".to_string()),
            code_length: 6,
            code_duration_seconds: 900,
            long_code_length: 12,
            long_code_duration_seconds: 86_400,
            sms_text_template: "your code is {{code}}".to_string(),
            allowed_test_types: 0,
            certificate_issuer: None,
            certificate_audience: None,
            abuse_prevention_enabled: false,
            abuse_prevention_limit: 0,
            mfa_mode: "optional".to_string(),
            email_verification_mode: "optional".to_string(),
            use_system_sms_config: true,
            use_system_email_config: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn cache_round_trips_a_realm_by_id_and_name() {
        let cache: Arc<dyn Cacher> = Arc::new(verihold_crypto::cacher::InMemoryCacher::new());
        let realm = sample_realm();

        write_cached(&cache, &cache_key_id(realm.id), &realm).await;
        let hit = read_cached(&cache, &cache_key_id(realm.id)).await.unwrap();
        assert_eq!(hit.id, realm.id);
        assert_eq!(hit.name, realm.name);

        assert!(read_cached(&cache, &cache_key_name("acme")).await.is_none());
    }

    #[tokio::test]
    async fn cache_key_for_name_is_case_insensitive() {
        assert_eq!(cache_key_name("ACME"), cache_key_name("acme"));
    }
}
