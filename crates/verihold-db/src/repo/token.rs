//! Token claim engine (spec §4.3 `ClaimToken`): single-use bearer
//! artifacts minted by `VerifyCodeAndIssueToken`, redeemed exactly once.

use crate::error::{DbError, DbResult};
use crate::models::Token;
use crate::pool::Pool;
use crate::repo::stats::StatsRepository;
use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use verihold_core::subject::Subject;

/// Repository for the `tokens` table.
pub struct TokenRepository {
    pool: PgPool,
}

impl TokenRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// Look a token up by its public id, scoped to a realm.
    pub async fn find(&self, realm_id: i64, token_id: &str, token: &CancellationToken) -> DbResult<Token> {
        crate::repo::cancellable(token, async {
            sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE realm_id = $1 AND token_id = $2")
                .bind(realm_id)
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(DbError::VerificationCodeNotFound)
        })
        .await
    }

    /// `ClaimToken` (spec §4.3): row-locks the token, checks expiry/used
    /// state, and verifies the presented subject matches field-for-field
    /// before marking it redeemed.
    pub async fn claim(
        &self,
        realm_id: i64,
        token_id: &str,
        presented: &Subject,
        authorized_app_id: Option<i64>,
        stats: &StatsRepository,
        cancellation: &CancellationToken,
    ) -> DbResult<Token> {
        let claimed = crate::repo::cancellable(cancellation, async {
            let mut tx = self.pool.begin().await.map_err(|e| {
                DbError::TransactionError(format!("failed to start transaction: {e}"))
            })?;

            let row = sqlx::query_as::<_, Token>(
                "SELECT * FROM tokens WHERE realm_id = $1 AND token_id = $2 FOR UPDATE",
            )
            .bind(realm_id)
            .bind(token_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::VerificationCodeNotFound)?;

            if row.expires_at <= Utc::now() {
                tx.rollback().await.ok();
                return Err(DbError::TokenExpired);
            }
            if row.used {
                tx.rollback().await.ok();
                return Err(DbError::TokenUsed);
            }
            if !row.subject().matches(presented) {
                tx.rollback().await.ok();
                return Err(DbError::TokenMetadataMismatch);
            }

            let updated = sqlx::query_as::<_, Token>(
                "UPDATE tokens SET used = true, updated_at = NOW() WHERE id = $1 RETURNING *",
            )
            .bind(row.id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit()
                .await
                .map_err(|e| DbError::TransactionError(format!("failed to commit: {e}")))?;

            Ok(updated)
        })
        .await;

        // Fire-and-forget: stats updates run detached from the caller's
        // cancellation and may lag the parent commit (spec §5).
        let today = Utc::now().date_naive();
        let stats = stats.clone();
        match &claimed {
            Ok(_) => {
                tokio::spawn(async move {
                    if let Err(e) = stats.record_token_claimed(today, realm_id, authorized_app_id).await {
                        tracing::warn!(error = %e, "failed to record token-claimed stats");
                    }
                });
            }
            Err(e) if !matches!(e, DbError::TokenUsed) => {
                tokio::spawn(async move {
                    if let Err(e) = stats.record_token_invalid(today, realm_id, authorized_app_id).await {
                        tracing::warn!(error = %e, "failed to record token-invalid stats");
                    }
                });
            }
            _ => {}
        }

        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TokenRepository>();
    }
}
