//! Secret reference registry (spec §3 `Secret`, §4.5 envelope encryption
//! consumers). Rows here never hold secret material directly — just a
//! `reference` a [`verihold_crypto::secretmanager::SecretManager`] resolves.

use crate::error::{DbError, DbResult};
use crate::models::{secret_consumption_order, Secret};
use crate::pool::Pool;
use crate::repo::cancellable;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use verihold_core::validation::Validatable;
use verihold_crypto::secretmanager::SecretManager;

/// Repository for the `secrets` table.
pub struct SecretRepository {
    pool: PgPool,
}

impl SecretRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// Register a new secret reference.
    pub async fn create(&self, mut secret: Secret, token: &CancellationToken) -> DbResult<Secret> {
        secret.validate_result()?;
        cancellable(token, async {
            Ok(sqlx::query_as::<_, Secret>(
                r#"
                INSERT INTO secrets (type, reference, active)
                VALUES ($1, $2, $3)
                RETURNING *
                "#,
            )
            .bind(&secret.secret_type)
            .bind(&secret.reference)
            .bind(secret.active)
            .fetch_one(&self.pool)
            .await?)
        })
        .await
    }

    /// All secrets of a given type, in consumption order: active first,
    /// then oldest-to-newest (spec §3 staged-rollout order).
    pub async fn list_by_type(
        &self,
        secret_type: &str,
        token: &CancellationToken,
    ) -> DbResult<Vec<Secret>> {
        cancellable(token, async {
            let mut secrets = sqlx::query_as::<_, Secret>(
                "SELECT * FROM secrets WHERE type = $1 AND deleted_at IS NULL",
            )
            .bind(secret_type)
            .fetch_all(&self.pool)
            .await?;
            secrets.sort_by(secret_consumption_order);
            Ok(secrets)
        })
        .await
    }

    /// Resolve every secret of `secret_type`, in consumption order, to its
    /// current value through `manager`. Used to build a
    /// [`verihold_crypto::hmac::RollingKeys`] set from stored references.
    pub async fn resolve_values(
        &self,
        secret_type: &str,
        manager: &Arc<dyn SecretManager>,
        token: &CancellationToken,
    ) -> DbResult<Vec<Vec<u8>>> {
        let refs = self.list_by_type(secret_type, token).await?;
        let mut values = Vec::with_capacity(refs.len());
        for secret in refs {
            values.push(manager.get_secret(&secret.reference).await?);
        }
        Ok(values)
    }

    /// Mark a secret active or inactive.
    pub async fn set_active(
        &self,
        id: i64,
        active: bool,
        token: &CancellationToken,
    ) -> DbResult<Secret> {
        cancellable(token, async {
            sqlx::query_as::<_, Secret>(
                "UPDATE secrets SET active = $1, updated_at = NOW() WHERE id = $2 AND deleted_at IS NULL RETURNING *",
            )
            .bind(active)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::SecretNotExist(id.to_string()))
        })
        .await
    }

    /// Soft-delete a secret reference.
    pub async fn soft_delete(&self, id: i64, token: &CancellationToken) -> DbResult<()> {
        cancellable(token, async {
            sqlx::query("UPDATE secrets SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SecretRepository>();
    }
}
