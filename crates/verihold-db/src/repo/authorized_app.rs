//! Authorized-app registry: API-key issuance, HMAC storage, and
//! signed-envelope verification (spec §4.2). Lookups go through a
//! write-through [`Cacher`] (spec §5) keyed on the already-irreversible
//! database-side HMAC digest, never on the presented key itself.

use crate::error::{DbError, DbResult};
use crate::models::AuthorizedApp;
use crate::pool::Pool;
use crate::repo::audit::AuditWriter;
use crate::repo::cancellable;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use verihold_core::validation::Validatable;
use verihold_crypto::apikey::{self, PresentedApiKey};
use verihold_crypto::cacher::Cacher;
use verihold_crypto::hmac::RollingKeys;

/// How long a cached app lookup is trusted before a fresh read.
const CACHE_TTL: Duration = Duration::from_secs(60);

fn cache_key(digest: &[u8]) -> String {
    format!("authorized_app:hmac:{}", STANDARD.encode(digest))
}

/// Repository for the `authorized_apps` table.
pub struct AuthorizedAppRepository {
    pool: PgPool,
}

impl AuthorizedAppRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// `CreateAuthorizedApp(realm, name, type)` (spec §4.2). Returns the
    /// saved row and the full envelope string — the only time the
    /// plaintext key ever exists.
    pub async fn create(
        &self,
        realm_id: i64,
        name: &str,
        api_key_type: &str,
        signature_keys: &RollingKeys,
        database_keys: &RollingKeys,
        actor_id: Option<&str>,
        token: &CancellationToken,
    ) -> DbResult<(AuthorizedApp, String)> {
        cancellable(token, async {
            let issued = apikey::issue(&realm_id.to_string(), signature_keys, database_keys);
            // Preview is a prefix of the envelope's base64url opaque-key
            // segment, not a re-encoding of its raw bytes (spec §4.2 step 3).
            let opaque_b64 = issued.envelope.split('.').next().unwrap_or_default();
            let preview: String = opaque_b64.chars().take(6).collect();

            let app = AuthorizedApp {
                id: 0,
                realm_id,
                name: name.to_string(),
                api_key: issued.database_hmac.clone(),
                api_key_preview: preview,
                api_key_type: api_key_type.to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                deleted_at: None,
            };
            app.validate_result()?;

            let mut tx = self.pool.begin().await.map_err(|e| {
                DbError::TransactionError(format!("failed to start transaction: {e}"))
            })?;

            let saved = sqlx::query_as::<_, AuthorizedApp>(
                r#"
                INSERT INTO authorized_apps (realm_id, name, api_key, api_key_preview, api_key_type)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
                "#,
            )
            .bind(app.realm_id)
            .bind(&app.name)
            .bind(&app.api_key)
            .bind(&app.api_key_preview)
            .bind(&app.api_key_type)
            .fetch_one(&mut *tx)
            .await?;

            AuditWriter::new(actor_id)
                .write(&mut tx, "created API key", &saved, Some(saved.realm_id))
                .await?;

            tx.commit()
                .await
                .map_err(|e| DbError::TransactionError(format!("failed to commit: {e}")))?;

            Ok((saved, issued.envelope))
        })
        .await
    }

    /// `FindAuthorizedAppByAPIKey(presented)` (spec §4.2): dual-path
    /// (enveloped vs legacy) lookup. Not-found and bad-signature are
    /// indistinguishable to the caller. Checks `cache` (keyed on the
    /// primary candidate digest) before Postgres and populates it on a
    /// miss.
    pub async fn find_by_api_key(
        &self,
        presented: &str,
        signature_keys: &RollingKeys,
        database_keys: &RollingKeys,
        cache: &Arc<dyn Cacher>,
        token: &CancellationToken,
    ) -> DbResult<AuthorizedApp> {
        let parsed = apikey::parse(presented).map_err(|_| DbError::NotFound("authorized app".into()))?;

        match &parsed {
            PresentedApiKey::Enveloped { realm_id, .. } => {
                if !apikey::verify_envelope_signature(&parsed, signature_keys) {
                    return Err(DbError::NotFound("authorized app".into()));
                }
                let realm_id: i64 = realm_id
                    .parse()
                    .map_err(|_| DbError::NotFound("authorized app".into()))?;
                let candidates = apikey::find_candidates(&parsed, database_keys);
                let key = candidates.first().map(|d| cache_key(d));

                if let Some(key) = &key {
                    if let Some(app) = read_cached(cache, key).await {
                        return Ok(app);
                    }
                }

                let app = cancellable(token, async {
                    sqlx::query_as::<_, AuthorizedApp>(
                        "SELECT * FROM authorized_apps WHERE api_key = ANY($1) AND realm_id = $2 AND deleted_at IS NULL",
                    )
                    .bind(&candidates)
                    .bind(realm_id)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| DbError::NotFound("authorized app".into()))
                })
                .await?;

                if let Some(key) = &key {
                    write_cached(cache, key, &app).await;
                }
                Ok(app)
            }
            PresentedApiKey::Legacy { .. } => {
                let candidates = apikey::find_candidates(&parsed, database_keys);
                let key = candidates.first().map(|d| cache_key(d));

                if let Some(key) = &key {
                    if let Some(app) = read_cached(cache, key).await {
                        return Ok(app);
                    }
                }

                let app = cancellable(token, async {
                    sqlx::query_as::<_, AuthorizedApp>(
                        "SELECT * FROM authorized_apps WHERE api_key = ANY($1) AND deleted_at IS NULL",
                    )
                    .bind(&candidates)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| DbError::NotFound("authorized app".into()))
                })
                .await?;

                if let Some(key) = &key {
                    write_cached(cache, key, &app).await;
                }
                Ok(app)
            }
        }
    }

    /// Soft-delete, deactivating the app and invalidating its cache entry.
    pub async fn soft_delete(&self, id: i64, cache: &Arc<dyn Cacher>, token: &CancellationToken) -> DbResult<()> {
        let api_key = cancellable(token, async {
            Ok(sqlx::query_scalar::<_, Vec<u8>>("SELECT api_key FROM authorized_apps WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?)
        })
        .await?;

        cancellable(token, async {
            sqlx::query(
                "UPDATE authorized_apps SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;

        if let Some(api_key) = api_key {
            cache.delete(&cache_key(&api_key)).await;
        }
        Ok(())
    }

    /// Hard-delete apps soft-deleted for longer than `max_age`.
    pub async fn purge(&self, max_age: chrono::Duration, token: &CancellationToken) -> DbResult<u64> {
        cancellable(token, async {
            let cutoff = Utc::now() - max_age;
            let result = sqlx::query("DELETE FROM authorized_apps WHERE deleted_at IS NOT NULL AND deleted_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

async fn read_cached(cache: &Arc<dyn Cacher>, key: &str) -> Option<AuthorizedApp> {
    let bytes = cache.get(key).await?;
    serde_json::from_slice(&bytes).ok()
}

async fn write_cached(cache: &Arc<dyn Cacher>, key: &str, app: &AuthorizedApp) {
    if let Ok(bytes) = serde_json::to_vec(app) {
        cache.set(key, bytes, CACHE_TTL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuthorizedAppRepository>();
    }

    fn sample_app() -> AuthorizedApp {
        let now = Utc::now();
        AuthorizedApp {
            id: 3,
            realm_id: 1,
            name: "mobile-client".to_string(),
            api_key: vec![1, 2, 3, 4],
            api_key_preview: "abcdef".to_string(),
            api_key_type: "device".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn cache_round_trips_an_authorized_app_by_hmac_digest() {
        let cache: Arc<dyn Cacher> = Arc::new(verihold_crypto::cacher::InMemoryCacher::new());
        let app = sample_app();
        let key = cache_key(&app.api_key);

        write_cached(&cache, &key, &app).await;
        let hit = read_cached(&cache, &key).await.unwrap();
        assert_eq!(hit.id, app.id);
        assert_eq!(hit.api_key, app.api_key);
    }

    #[test]
    fn cache_key_is_not_the_raw_digest() {
        let digest = vec![9, 9, 9];
        assert_ne!(cache_key(&digest), STANDARD.encode(&digest));
    }
}
