//! Per-engine repositories (spec §4). One module per component named in
//! spec §2's component table, each following the teacher's repository
//! idiom: a struct holding a `PgPool` built from `Pool::new`/`pool.inner()`,
//! async methods built on `sqlx::query_as::<_, T>(sql).bind(..).fetch_*`.

pub mod audit;
pub mod authorized_app;
pub mod email_config;
pub mod named_lock;
pub mod realm;
pub mod secret;
pub mod sms_config;
pub mod stats;
pub mod token;
pub mod user_report;
pub mod verification_code;

use crate::error::{DbError, DbResult};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Race `fut` against `token`'s cancellation (spec §5: "callers pass a
/// cancellation context; the data layer propagates it to the driver").
pub(crate) async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    if token.is_cancelled() {
        return Err(DbError::Cancelled);
    }
    tokio::select! {
        _ = token.cancelled() => Err(DbError::Cancelled),
        result = fut => result,
    }
}
