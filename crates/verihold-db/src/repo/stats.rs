//! Daily stats aggregation (spec §4.6): one row per (date, dimension),
//! updated in place with `INSERT ... ON CONFLICT DO UPDATE` so a late
//! claim against an old code still lands on the day the code was issued.

use crate::error::DbResult;
use crate::models::{AuthorizedAppStat, ExternalIssuerStat, KeyServerStats, RealmStat, UserStat};
use crate::pool::Pool;
use crate::repo::cancellable;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Upper bound, in seconds, of each claim-age bucket. The final boundary
/// (14 days) is nominal: any age past the ninth boundary (24h) folds into
/// the last bucket rather than opening an unbounded twelfth one.
pub const CLAIM_AGE_BUCKETS: [i64; 11] = [
    60,      // 1m
    300,     // 5m
    900,     // 15m
    1_800,   // 30m
    3_600,   // 1h
    7_200,   // 2h
    10_800,  // 3h
    21_600,  // 6h
    43_200,  // 12h
    86_400,  // 24h
    1_209_600, // 336h
];

/// The bucket index `age_seconds` falls into, per [`CLAIM_AGE_BUCKETS`].
pub fn claim_age_bucket_index(age_seconds: i64) -> usize {
    CLAIM_AGE_BUCKETS
        .iter()
        .position(|&boundary| age_seconds <= boundary)
        .unwrap_or(CLAIM_AGE_BUCKETS.len() - 1)
}

/// Fold one new claim-age sample into a running mean (Welford's online
/// formula, avoiding the numeric overflow a naive running sum accrues over
/// a long-lived realm).
pub fn update_running_mean(mean: f64, sample_count: i64, new_sample_seconds: i64) -> (f64, i64) {
    let new_count = sample_count + 1;
    let delta = new_sample_seconds as f64 - mean;
    let new_mean = mean + delta / new_count as f64;
    (new_mean, new_count)
}

/// Repository for the five daily-stats tables. Cheaply `Clone`d (it only
/// holds a pool handle) so callers can move an owned copy into a
/// `tokio::spawn`ed fire-and-forget update (spec §5).
#[derive(Clone)]
pub struct StatsRepository {
    pool: PgPool,
}

impl StatsRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// Record a code claim, folding `claim_age` into the realm's
    /// claim-age histogram and running mean (spec §4.6).
    pub async fn record_code_claimed(
        &self,
        date: NaiveDate,
        realm_id: i64,
        authorized_app_id: Option<i64>,
        claim_age_seconds: i64,
    ) -> DbResult<()> {
        let bucket = claim_age_bucket_index(claim_age_seconds);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO realm_stats (date, realm_id, codes_claimed, claim_age_sample_count, claim_age_mean_seconds)
            VALUES ($1, $2, 1, 1, $3)
            ON CONFLICT (date, realm_id) DO UPDATE SET
                codes_claimed = realm_stats.codes_claimed + 1,
                claim_age_mean_seconds = realm_stats.claim_age_mean_seconds
                    + ($3 - realm_stats.claim_age_mean_seconds) / (realm_stats.claim_age_sample_count + 1),
                claim_age_sample_count = realm_stats.claim_age_sample_count + 1
            "#,
        )
        .bind(date)
        .bind(realm_id)
        .bind(claim_age_seconds as f64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            UPDATE realm_stats SET claim_age_buckets[{idx}] = claim_age_buckets[{idx}] + 1
            WHERE date = $1 AND realm_id = $2
            "#,
            idx = bucket + 1
        ))
        .bind(date)
        .bind(realm_id)
        .execute(&mut *tx)
        .await?;

        if let Some(app_id) = authorized_app_id {
            sqlx::query(
                r#"
                INSERT INTO authorized_app_stats (date, authorized_app_id, codes_claimed)
                VALUES ($1, $2, 1)
                ON CONFLICT (date, authorized_app_id) DO UPDATE SET codes_claimed = authorized_app_stats.codes_claimed + 1
                "#,
            )
            .bind(date)
            .bind(app_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Increment the invalid-attempt counters for a realm/app pair.
    pub async fn record_code_invalid(&self, date: NaiveDate, realm_id: i64, authorized_app_id: Option<i64>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO realm_stats (date, realm_id, codes_invalid)
            VALUES ($1, $2, 1)
            ON CONFLICT (date, realm_id) DO UPDATE SET codes_invalid = realm_stats.codes_invalid + 1
            "#,
        )
        .bind(date)
        .bind(realm_id)
        .execute(&self.pool)
        .await?;

        if let Some(app_id) = authorized_app_id {
            sqlx::query(
                r#"
                INSERT INTO authorized_app_stats (date, authorized_app_id, codes_invalid)
                VALUES ($1, $2, 1)
                ON CONFLICT (date, authorized_app_id) DO UPDATE SET codes_invalid = authorized_app_stats.codes_invalid + 1
                "#,
            )
            .bind(date)
            .bind(app_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Increment the tokens-claimed counters for a realm/app pair.
    pub async fn record_token_claimed(&self, date: NaiveDate, realm_id: i64, authorized_app_id: Option<i64>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO realm_stats (date, realm_id, tokens_claimed)
            VALUES ($1, $2, 1)
            ON CONFLICT (date, realm_id) DO UPDATE SET tokens_claimed = realm_stats.tokens_claimed + 1
            "#,
        )
        .bind(date)
        .bind(realm_id)
        .execute(&self.pool)
        .await?;

        if let Some(app_id) = authorized_app_id {
            sqlx::query(
                r#"
                INSERT INTO authorized_app_stats (date, authorized_app_id, tokens_claimed)
                VALUES ($1, $2, 1)
                ON CONFLICT (date, authorized_app_id) DO UPDATE SET tokens_claimed = authorized_app_stats.tokens_claimed + 1
                "#,
            )
            .bind(date)
            .bind(app_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Increment the tokens-invalid counters for a realm/app pair.
    pub async fn record_token_invalid(&self, date: NaiveDate, realm_id: i64, authorized_app_id: Option<i64>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO realm_stats (date, realm_id, tokens_invalid)
            VALUES ($1, $2, 1)
            ON CONFLICT (date, realm_id) DO UPDATE SET tokens_invalid = realm_stats.tokens_invalid + 1
            "#,
        )
        .bind(date)
        .bind(realm_id)
        .execute(&self.pool)
        .await?;

        if let Some(app_id) = authorized_app_id {
            sqlx::query(
                r#"
                INSERT INTO authorized_app_stats (date, authorized_app_id, tokens_invalid)
                VALUES ($1, $2, 1)
                ON CONFLICT (date, authorized_app_id) DO UPDATE SET tokens_invalid = authorized_app_stats.tokens_invalid + 1
                "#,
            )
            .bind(date)
            .bind(app_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Bump process-wide key-server request/error counters for today.
    pub async fn record_key_server_request(&self, errored: bool) -> DbResult<()> {
        let date = Utc::now().date_naive();
        sqlx::query(
            r#"
            INSERT INTO key_server_stats (date, requests, errors)
            VALUES ($1, 1, $2)
            ON CONFLICT (date) DO UPDATE SET
                requests = key_server_stats.requests + 1,
                errors = key_server_stats.errors + EXCLUDED.errors
            "#,
        )
        .bind(date)
        .bind(if errored { 1_i64 } else { 0_i64 })
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Realm stats for a closed date range, newest first (spec §4.6 JSON
    /// marshalling order).
    pub async fn realm_stats(
        &self,
        realm_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        token: &CancellationToken,
    ) -> DbResult<Vec<RealmStat>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, RealmStat>(
                "SELECT * FROM realm_stats WHERE realm_id = $1 AND date BETWEEN $2 AND $3 ORDER BY date DESC",
            )
            .bind(realm_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Per-app stats for a closed date range, newest first.
    pub async fn authorized_app_stats(
        &self,
        authorized_app_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        token: &CancellationToken,
    ) -> DbResult<Vec<AuthorizedAppStat>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, AuthorizedAppStat>(
                "SELECT * FROM authorized_app_stats WHERE authorized_app_id = $1 AND date BETWEEN $2 AND $3 ORDER BY date DESC",
            )
            .bind(authorized_app_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Per-user stats for a closed date range, newest first.
    pub async fn user_stats(
        &self,
        realm_id: i64,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
        token: &CancellationToken,
    ) -> DbResult<Vec<UserStat>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, UserStat>(
                "SELECT * FROM user_stats WHERE realm_id = $1 AND user_id = $2 AND date BETWEEN $3 AND $4 ORDER BY date DESC",
            )
            .bind(realm_id)
            .bind(user_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Per-external-issuer stats for a closed date range, newest first.
    pub async fn external_issuer_stats(
        &self,
        realm_id: i64,
        issuer_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        token: &CancellationToken,
    ) -> DbResult<Vec<ExternalIssuerStat>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, ExternalIssuerStat>(
                "SELECT * FROM external_issuer_stats WHERE realm_id = $1 AND issuer_id = $2 AND date BETWEEN $3 AND $4 ORDER BY date DESC",
            )
            .bind(realm_id)
            .bind(issuer_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Process-wide key-server stats for a closed date range, newest first.
    pub async fn key_server_stats(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        token: &CancellationToken,
    ) -> DbResult<Vec<KeyServerStats>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, KeyServerStats>(
                "SELECT * FROM key_server_stats WHERE date BETWEEN $1 AND $2 ORDER BY date DESC",
            )
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }
}

/// Marshal realm stats to CSV, one row per date, stable column order (spec
/// §4.6).
pub fn realm_stats_to_csv(stats: &[RealmStat]) -> DbResult<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "date",
        "realm_id",
        "codes_issued",
        "codes_claimed",
        "codes_invalid",
        "tokens_claimed",
        "tokens_invalid",
        "user_reports_issued",
        "user_reports_claimed",
        "claim_age_mean_seconds",
        "claim_age_sample_count",
    ])
    .map_err(|e| crate::error::DbError::Generic(format!("csv header write failed: {e}")))?;

    for stat in stats {
        writer
            .write_record([
                stat.date.to_string(),
                stat.realm_id.to_string(),
                stat.codes_issued.to_string(),
                stat.codes_claimed.to_string(),
                stat.codes_invalid.to_string(),
                stat.tokens_claimed.to_string(),
                stat.tokens_invalid.to_string(),
                stat.user_reports_issued.to_string(),
                stat.user_reports_claimed.to_string(),
                stat.claim_age_mean_seconds.to_string(),
                stat.claim_age_sample_count.to_string(),
            ])
            .map_err(|e| crate::error::DbError::Generic(format!("csv write failed: {e}")))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| crate::error::DbError::Generic(format!("csv flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| crate::error::DbError::Generic(format!("csv output was not utf8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_age_bucket_boundaries_are_fixed_and_ascending() {
        assert_eq!(CLAIM_AGE_BUCKETS.len(), 11);
        assert!(CLAIM_AGE_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn ages_sort_into_the_expected_bucket() {
        assert_eq!(claim_age_bucket_index(30), 0);
        assert_eq!(claim_age_bucket_index(61), 1);
        assert_eq!(claim_age_bucket_index(3_600), 4);
        assert_eq!(claim_age_bucket_index(10_000_000), CLAIM_AGE_BUCKETS.len() - 1);
    }

    #[test]
    fn running_mean_converges_to_the_simple_average() {
        let mut mean = 0.0;
        let mut count = 0;
        for sample in [10, 20, 30] {
            let (m, c) = update_running_mean(mean, count, sample);
            mean = m;
            count = c;
        }
        assert_eq!(count, 3);
        assert!((mean - 20.0).abs() < 1e-9);
    }

    #[test]
    fn repository_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StatsRepository>();
    }

    #[test]
    fn csv_output_starts_with_the_stable_header_row() {
        let csv = realm_stats_to_csv(&[]).unwrap();
        assert!(csv.starts_with("date,realm_id,codes_issued"));
    }
}
