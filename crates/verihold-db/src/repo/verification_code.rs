//! Verification-code lifecycle engine (spec §4.3): issuance, exchange for a
//! token, recycling, purging, and manual expiry.

use crate::error::{DbError, DbResult};
use crate::models::{Realm, Token, VerificationCode};
use crate::pool::Pool;
use crate::repo::stats::StatsRepository;
use crate::repo::user_report::UserReportRepository;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use rand::RngCore;
use sqlx::{PgPool, Postgres, Transaction};
use tokio_util::sync::CancellationToken;
use verihold_core::subject::TestType;
use verihold_crypto::hmac::RollingKeys;

const MAX_ISSUANCE_ATTEMPTS: u32 = 5;

/// Repository for the `verification_codes` table.
pub struct VerificationCodeRepository {
    pool: PgPool,
}

/// A freshly issued code pair, returned once in plaintext.
pub struct IssuedCode {
    pub record: VerificationCode,
    pub code: String,
    pub long_code: String,
}

/// The inputs a `VerifyCodeAndIssueToken` call needs beyond the presented
/// string, bundled so the method signature stays readable.
pub struct ClaimRequest<'a> {
    pub realm_id: i64,
    pub presented_code: &'a str,
    pub accepted_test_types: TestType,
    pub authorized_app_id: Option<i64>,
    pub presented_nonce_b64: Option<&'a str>,
    pub token_expires_after: Duration,
}

fn random_digit_code(length: i32) -> String {
    let mut rng = rand::thread_rng();
    (0..length.max(0)).map(|_| char::from(b'0' + (rng.next_u32() % 10) as u8)).collect()
}

impl VerificationCodeRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// Issue a new code pair under `realm`'s policy, retrying on a
    /// collision against the realm's unique-code index (spec §4.3
    /// Issuance). Stats counters are upserted in the same transaction.
    #[allow(clippy::too_many_arguments)]
    pub async fn issue(
        &self,
        realm: &Realm,
        code_keys: &RollingKeys,
        test_type: TestType,
        symptom_date: Option<chrono::NaiveDate>,
        test_date: Option<chrono::NaiveDate>,
        issuing_user_id: Option<i64>,
        issuing_app_id: Option<i64>,
        issuing_external_id: Option<&str>,
        user_report_id: Option<i64>,
        cancellation: &CancellationToken,
    ) -> DbResult<IssuedCode> {
        crate::repo::cancellable(cancellation, async {
            let now = Utc::now();
            let expires_at = now + Duration::seconds(realm.code_duration_seconds);
            let long_expires_at = now + Duration::seconds(realm.long_code_duration_seconds);

            for attempt in 0..MAX_ISSUANCE_ATTEMPTS {
                let code = random_digit_code(realm.code_length);
                let long_code = random_digit_code(realm.long_code_length);
                let code_hmac = code_keys.sign(code.as_bytes());
                let long_code_hmac = code_keys.sign(long_code.as_bytes());

                let mut tx = self.pool.begin().await.map_err(|e| {
                    DbError::TransactionError(format!("failed to start transaction: {e}"))
                })?;

                let inserted = sqlx::query_as::<_, VerificationCode>(
                    r#"
                    INSERT INTO verification_codes (
                        realm_id, uuid, code, long_code, claimed, test_type, symptom_date, test_date,
                        expires_at, long_expires_at, issuing_user_id, issuing_app_id, issuing_external_id,
                        user_report_id
                    )
                    VALUES (
                        $1, gen_random_uuid(), $2, $3, false, $4, $5, $6, $7, $8, $9, $10, $11, $12
                    )
                    RETURNING *
                    "#,
                )
                .bind(realm.id)
                .bind(&code_hmac)
                .bind(&long_code_hmac)
                .bind(test_type.bits())
                .bind(symptom_date)
                .bind(test_date)
                .bind(expires_at)
                .bind(long_expires_at)
                .bind(issuing_user_id)
                .bind(issuing_app_id)
                .bind(issuing_external_id)
                .bind(user_report_id)
                .fetch_one(&mut *tx)
                .await;

                let inserted = match inserted {
                    Ok(row) => row,
                    Err(sqlx::Error::Database(e)) if e.is_unique_violation() && attempt + 1 < MAX_ISSUANCE_ATTEMPTS => {
                        tx.rollback().await.ok();
                        continue;
                    }
                    Err(e) => return Err(DbError::from(e)),
                };

                record_issuance_stats(&mut tx, now.date_naive(), realm.id, issuing_app_id, issuing_user_id, issuing_external_id).await?;

                tx.commit()
                    .await
                    .map_err(|e| DbError::TransactionError(format!("failed to commit: {e}")))?;

                return Ok(IssuedCode { record: inserted, code, long_code });
            }

            Err(DbError::Generic("exhausted issuance attempts without a free code".to_string()))
        })
        .await
    }

    /// `VerifyCodeAndIssueToken` (spec §4.3): a single transaction that
    /// row-locks the matched code, validates it, optionally checks an
    /// attached user-report nonce, marks the code claimed, and mints a
    /// token. Stats are updated fire-and-forget after commit.
    pub async fn verify_and_issue_token(
        &self,
        request: ClaimRequest<'_>,
        code_keys: &RollingKeys,
        user_reports: &UserReportRepository,
        stats: &StatsRepository,
        cancellation: &CancellationToken,
    ) -> DbResult<Token> {
        let candidates = code_keys.sign_with_each(request.presented_code.as_bytes());

        let result = crate::repo::cancellable(cancellation, async {
            let mut tx = self.pool.begin().await.map_err(|e| {
                DbError::TransactionError(format!("failed to start transaction: {e}"))
            })?;

            let matched = sqlx::query_as::<_, VerificationCode>(
                r#"
                SELECT * FROM verification_codes
                WHERE realm_id = $1 AND (code = ANY($2) OR long_code = ANY($2))
                FOR UPDATE
                "#,
            )
            .bind(request.realm_id)
            .bind(&candidates)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::VerificationCodeNotFound)?;

            let now = Utc::now();
            let is_long_match = candidates.contains(&matched.long_code);
            let relevant_expiry = if is_long_match { matched.long_expires_at } else { matched.expires_at };

            if relevant_expiry <= now {
                return Err(DbError::VerificationCodeExpired);
            }
            if matched.claimed {
                return Err(DbError::VerificationCodeUsed);
            }
            if !request.accepted_test_types.contains(matched.test_type()) {
                return Err(DbError::UnsupportedTestType(matched.test_type().as_str().to_string()));
            }

            if let Some(report_id) = matched.user_report_id {
                let report = user_reports.lock_for_claim(&mut tx, report_id).await?;
                let presented = request.presented_nonce_b64.unwrap_or_default();
                if !crate::repo::user_report::UserReportRepository::nonce_matches(&report, presented) {
                    // Indistinguishable from a missing code (spec §4.3 step 6).
                    return Err(DbError::VerificationCodeNotFound);
                }
                user_reports.mark_code_claimed(&mut tx, report_id).await?;
            }

            sqlx::query("UPDATE verification_codes SET claimed = true, updated_at = NOW() WHERE id = $1")
                .bind(matched.id)
                .execute(&mut *tx)
                .await?;

            let mut token_id_bytes = vec![0u8; 96];
            rand::thread_rng().fill_bytes(&mut token_id_bytes);
            let token_id = STANDARD.encode(&token_id_bytes);

            let token = sqlx::query_as::<_, Token>(
                r#"
                INSERT INTO tokens (realm_id, token_id, test_type, symptom_date, test_date, used, expires_at)
                VALUES ($1, $2, $3, $4, $5, false, $6)
                RETURNING *
                "#,
            )
            .bind(request.realm_id)
            .bind(&token_id)
            .bind(matched.test_type)
            .bind(matched.symptom_date)
            .bind(matched.test_date)
            .bind(now + request.token_expires_after)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit()
                .await
                .map_err(|e| DbError::TransactionError(format!("failed to commit: {e}")))?;

            Ok((token, matched.created_at))
        })
        .await;

        let today = Utc::now().date_naive();
        match &result {
            Ok((_, created_at)) => {
                let age_seconds = (Utc::now() - *created_at).num_seconds().max(0);
                let stats = stats.clone();
                let realm_id = request.realm_id;
                let app_id = request.authorized_app_id;
                tokio::spawn(async move {
                    if let Err(e) = stats.record_code_claimed(today, realm_id, app_id, age_seconds).await {
                        tracing::warn!(error = %e, "failed to record code-claimed stats");
                    }
                });
            }
            Err(e) if !matches!(e, DbError::VerificationCodeUsed) => {
                let stats = stats.clone();
                let realm_id = request.realm_id;
                let app_id = request.authorized_app_id;
                tokio::spawn(async move {
                    if let Err(e) = stats.record_code_invalid(today, realm_id, app_id).await {
                        tracing::warn!(error = %e, "failed to record code-invalid stats");
                    }
                });
            }
            _ => {}
        }

        result.map(|(token, _)| token)
    }

    /// `RecycleVerificationCodes(maxAge)`: blank `code`/`long_code` on rows
    /// whose expiries are both older than `now - maxAge`, keeping the row
    /// (and its UUID) for status lookup.
    pub async fn recycle(&self, max_age: Duration, token: &CancellationToken) -> DbResult<u64> {
        crate::repo::cancellable(token, async {
            let cutoff = Utc::now() - max_age;
            let result = sqlx::query(
                r#"
                UPDATE verification_codes
                SET code = '\x'::bytea, long_code = '\x'::bytea, updated_at = NOW()
                WHERE expires_at < $1 AND long_expires_at < $1
                  AND (code != '\x'::bytea OR long_code != '\x'::bytea)
                "#,
            )
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// `PurgeVerificationCodes(maxAge)`: hard-delete rows whose expiries
    /// are both older than `now - maxAge`.
    pub async fn purge(&self, max_age: Duration, token: &CancellationToken) -> DbResult<u64> {
        crate::repo::cancellable(token, async {
            let cutoff = Utc::now() - max_age;
            let result = sqlx::query(
                "DELETE FROM verification_codes WHERE expires_at < $1 AND long_expires_at < $1",
            )
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// `ExpireCode(uuid)`: transactional lock; rejects if already expired
    /// or claimed; sets both expiries to `now`.
    pub async fn expire(&self, uuid: uuid::Uuid, token: &CancellationToken) -> DbResult<VerificationCode> {
        crate::repo::cancellable(token, async {
            let mut tx = self.pool.begin().await.map_err(|e| {
                DbError::TransactionError(format!("failed to start transaction: {e}"))
            })?;

            let row = sqlx::query_as::<_, VerificationCode>(
                "SELECT * FROM verification_codes WHERE uuid = $1 FOR UPDATE",
            )
            .bind(uuid)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::VerificationCodeNotFound)?;

            let now = Utc::now();
            if row.expires_at <= now && row.long_expires_at <= now {
                return Err(DbError::VerificationCodeExpired);
            }
            if row.claimed {
                return Err(DbError::VerificationCodeUsed);
            }

            let updated = sqlx::query_as::<_, VerificationCode>(
                "UPDATE verification_codes SET expires_at = $2, long_expires_at = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
            )
            .bind(row.id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit()
                .await
                .map_err(|e| DbError::TransactionError(format!("failed to commit: {e}")))?;

            Ok(updated)
        })
        .await
    }
}

async fn record_issuance_stats<'c>(
    tx: &mut Transaction<'c, Postgres>,
    date: chrono::NaiveDate,
    realm_id: i64,
    authorized_app_id: Option<i64>,
    issuing_user_id: Option<i64>,
    issuing_external_id: Option<&str>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO realm_stats (date, realm_id, codes_issued)
        VALUES ($1, $2, 1)
        ON CONFLICT (date, realm_id) DO UPDATE SET codes_issued = realm_stats.codes_issued + 1
        "#,
    )
    .bind(date)
    .bind(realm_id)
    .execute(&mut **tx)
    .await?;

    if let Some(app_id) = authorized_app_id {
        sqlx::query(
            r#"
            INSERT INTO authorized_app_stats (date, authorized_app_id, codes_issued)
            VALUES ($1, $2, 1)
            ON CONFLICT (date, authorized_app_id) DO UPDATE SET codes_issued = authorized_app_stats.codes_issued + 1
            "#,
        )
        .bind(date)
        .bind(app_id)
        .execute(&mut **tx)
        .await?;
    }

    if let Some(user_id) = issuing_user_id {
        sqlx::query(
            r#"
            INSERT INTO user_stats (date, realm_id, user_id, codes_issued)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (date, realm_id, user_id) DO UPDATE SET codes_issued = user_stats.codes_issued + 1
            "#,
        )
        .bind(date)
        .bind(realm_id)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    }

    if let Some(issuer_id) = issuing_external_id {
        sqlx::query(
            r#"
            INSERT INTO external_issuer_stats (date, realm_id, issuer_id, codes_issued)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (date, realm_id, issuer_id) DO UPDATE SET codes_issued = external_issuer_stats.codes_issued + 1
            "#,
        )
        .bind(date)
        .bind(realm_id)
        .bind(issuer_id)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VerificationCodeRepository>();
    }

    #[test]
    fn random_digit_code_has_the_requested_length_and_is_numeric() {
        let code = random_digit_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
