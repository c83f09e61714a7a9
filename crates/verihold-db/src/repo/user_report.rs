//! User-report nonce challenge (spec §3 `UserReport`, §4.3 step 6): a
//! phone-hash-keyed record a verification code may optionally attach to,
//! requiring the claimer to present a matching nonce.

use crate::error::{DbError, DbResult};
use crate::models::UserReport;
use crate::pool::Pool;
use crate::repo::cancellable;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tokio_util::sync::CancellationToken;
use verihold_core::validation::Validatable;

/// Repository for the `user_reports` table.
pub struct UserReportRepository {
    pool: PgPool,
}

impl UserReportRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// Register a new phone-hash + nonce challenge.
    pub async fn create(&self, mut report: UserReport, token: &CancellationToken) -> DbResult<UserReport> {
        report.validate_result()?;
        cancellable(token, async {
            Ok(sqlx::query_as::<_, UserReport>(
                r#"
                INSERT INTO user_reports (phone_hash, nonce, nonce_required, code_claimed)
                VALUES ($1, $2, $3, $4)
                RETURNING *
                "#,
            )
            .bind(&report.phone_hash)
            .bind(&report.nonce)
            .bind(report.nonce_required)
            .bind(report.code_claimed)
            .fetch_one(&self.pool)
            .await?)
        })
        .await
    }

    /// Find the active (unclaimed) report for a phone hash, if any.
    pub async fn find_by_phone_hash(
        &self,
        phone_hash: &[u8],
        token: &CancellationToken,
    ) -> DbResult<Option<UserReport>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, UserReport>(
                "SELECT * FROM user_reports WHERE phone_hash = $1 AND code_claimed = false",
            )
            .bind(phone_hash)
            .fetch_optional(&self.pool)
            .await?)
        })
        .await
    }

    /// Row-lock a report by id within a caller-owned transaction, the
    /// shape `VerifyCodeAndIssueToken` step 6 needs to compare nonces
    /// before releasing the lock.
    pub async fn lock_for_claim<'c>(
        &self,
        tx: &mut Transaction<'c, Postgres>,
        id: i64,
    ) -> DbResult<UserReport> {
        sqlx::query_as::<_, UserReport>("SELECT * FROM user_reports WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(DbError::VerificationCodeNotFound)
    }

    /// Compare a presented (already-base64-encoded) nonce against a
    /// locked report's stored value. A mismatch must surface to the
    /// caller as `VerificationCodeNotFound`, indistinguishable from a
    /// missing code (spec §4.3 step 6).
    pub fn nonce_matches(report: &UserReport, presented_nonce_b64: &str) -> bool {
        STANDARD.encode(&report.nonce) == presented_nonce_b64
    }

    /// Mark a report's code as claimed, within the caller's transaction.
    pub async fn mark_code_claimed<'c>(
        &self,
        tx: &mut Transaction<'c, Postgres>,
        id: i64,
    ) -> DbResult<UserReport> {
        Ok(sqlx::query_as::<_, UserReport>(
            "UPDATE user_reports SET code_claimed = true, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&mut **tx)
        .await?)
    }

    /// Purge reports past their retention window. Unclaimed and claimed
    /// reports carry separate ages, since a claimed report's nonce is no
    /// longer security-relevant (spec §3 retention policy).
    pub async fn purge(
        &self,
        unclaimed_max_age: Duration,
        claimed_max_age: Duration,
        token: &CancellationToken,
    ) -> DbResult<u64> {
        cancellable(token, async {
            let now = Utc::now();
            let result = sqlx::query(
                r#"
                DELETE FROM user_reports
                WHERE (code_claimed = false AND created_at < $1)
                   OR (code_claimed = true AND updated_at < $2)
                "#,
            )
            .bind(now - unclaimed_max_age)
            .bind(now - claimed_max_age)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
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
        assert_send_sync::<UserReportRepository>();
    }

    #[test]
    fn nonce_comparison_is_base64_exact() {
        let report = UserReport {
            id: 1,
            phone_hash: vec![1, 2, 3],
            nonce: vec![0u8; 256],
            nonce_required: true,
            code_claimed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let encoded = STANDARD.encode(&report.nonce);
        assert!(UserReportRepository::nonce_matches(&report, &encoded));
        assert!(!UserReportRepository::nonce_matches(&report, "not-it"));
    }
}
