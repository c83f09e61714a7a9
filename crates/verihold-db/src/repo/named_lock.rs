//! Cooperative named locks (spec §4.4 `LockStatus`): a worker claims a
//! named lease by bumping a generation counter under a row lock, and holds
//! it until `not_before` passes without a competing claim.

use crate::error::{DbError, DbResult};
use crate::models::LockStatus;
use crate::pool::Pool;
use crate::repo::cancellable;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Repository for the `lock_status` table.
pub struct NamedLockRepository {
    pool: PgPool,
}

impl NamedLockRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// `TryLock(name, ttl)` (spec §4.4): claim `name` if it is unheld or its
    /// lease has expired. Returns the generation the caller now holds the
    /// lock at.
    pub async fn try_lock(
        &self,
        name: &str,
        ttl: Duration,
        token: &CancellationToken,
    ) -> DbResult<LockStatus> {
        cancellable(token, async {
            let mut tx = self.pool.begin().await.map_err(|e| {
                DbError::TransactionError(format!("failed to start transaction: {e}"))
            })?;

            let existing = sqlx::query_as::<_, LockStatus>(
                "SELECT * FROM lock_status WHERE type = $1 FOR UPDATE",
            )
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;

            let now = Utc::now();
            let not_before = now + ttl;

            let claimed = match existing {
                None => {
                    sqlx::query_as::<_, LockStatus>(
                        r#"
                        INSERT INTO lock_status (type, generation, not_before)
                        VALUES ($1, 1, $2)
                        RETURNING *
                        "#,
                    )
                    .bind(name)
                    .bind(not_before)
                    .fetch_one(&mut *tx)
                    .await?
                }
                Some(row) if row.not_before <= now => {
                    sqlx::query_as::<_, LockStatus>(
                        r#"
                        UPDATE lock_status SET generation = generation + 1, not_before = $2, updated_at = NOW()
                        WHERE type = $1
                        RETURNING *
                        "#,
                    )
                    .bind(name)
                    .bind(not_before)
                    .fetch_one(&mut *tx)
                    .await?
                }
                Some(row) => {
                    tx.rollback().await.ok();
                    return Err(DbError::WrongGeneration { expected: row.generation + 1, found: row.generation });
                }
            };

            tx.commit()
                .await
                .map_err(|e| DbError::TransactionError(format!("failed to commit: {e}")))?;

            Ok(claimed)
        })
        .await
    }

    /// `ClaimLock(current, ttl)` (spec §4.4): extend a lease the caller
    /// believes it holds at generation `current`, failing with
    /// [`DbError::WrongGeneration`] if another worker has since claimed it.
    pub async fn claim_lock(
        &self,
        name: &str,
        current_generation: i64,
        ttl: Duration,
        token: &CancellationToken,
    ) -> DbResult<LockStatus> {
        cancellable(token, async {
            let mut tx = self.pool.begin().await.map_err(|e| {
                DbError::TransactionError(format!("failed to start transaction: {e}"))
            })?;

            let row = sqlx::query_as::<_, LockStatus>(
                "SELECT * FROM lock_status WHERE type = $1 FOR UPDATE",
            )
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("lock {name}")))?;

            if row.generation != current_generation {
                tx.rollback().await.ok();
                return Err(DbError::WrongGeneration {
                    expected: current_generation,
                    found: row.generation,
                });
            }

            let not_before = Utc::now() + ttl;
            let renewed = sqlx::query_as::<_, LockStatus>(
                r#"
                UPDATE lock_status SET generation = generation + 1, not_before = $2, updated_at = NOW()
                WHERE type = $1
                RETURNING *
                "#,
            )
            .bind(name)
            .bind(not_before)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit()
                .await
                .map_err(|e| DbError::TransactionError(format!("failed to commit: {e}")))?;

            Ok(renewed)
        })
        .await
    }

    /// Release a lock early by pulling its lease into the past, so the
    /// next `try_lock` succeeds immediately regardless of `ttl`.
    pub async fn unlock(
        &self,
        name: &str,
        current_generation: i64,
        token: &CancellationToken,
    ) -> DbResult<()> {
        cancellable(token, async {
            let result = sqlx::query(
                "UPDATE lock_status SET not_before = NOW(), updated_at = NOW() WHERE type = $1 AND generation = $2",
            )
            .bind(name)
            .bind(current_generation)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::NotFound(format!("lock {name} at generation {current_generation}")));
            }
            Ok(())
        })
        .await
    }

    /// Current state of a named lock, if it has ever been claimed.
    pub async fn find(&self, name: &str, token: &CancellationToken) -> DbResult<Option<LockStatus>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, LockStatus>("SELECT * FROM lock_status WHERE type = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?)
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
        assert_send_sync::<NamedLockRepository>();
    }
}
