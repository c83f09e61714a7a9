//! Audit log (spec §4.8): every mutating write records an `AuditEntry` row
//! in the same transaction as the write it describes.

use crate::error::DbResult;
use crate::models::AuditEntry;
use crate::pool::Pool;
use crate::repo::cancellable;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use tokio_util::sync::CancellationToken;
use verihold_core::audit::{Auditable, DiffSet};

/// Writes `AuditEntry` rows for a single actor, inside a caller-supplied
/// transaction. Other repositories hold one of these and call `write`/
/// `write_diff` right before `tx.commit()`.
pub struct AuditWriter {
    actor_id: Option<String>,
}

impl AuditWriter {
    /// An audit writer attributing entries to `actor_id` (absent for
    /// system-initiated writes such as recycling or purges).
    pub fn new(actor_id: Option<&str>) -> Self {
        Self { actor_id: actor_id.map(str::to_string) }
    }

    /// Record `action` against `entity`, with no field-level diff.
    pub async fn write<'c, E: Auditable>(
        &self,
        tx: &mut Transaction<'c, Postgres>,
        action: &str,
        entity: &E,
        realm_id: Option<i64>,
    ) -> DbResult<AuditEntry> {
        self.write_diff(tx, action, entity, realm_id, &DiffSet::new()).await
    }

    /// Record `action` against `entity`, attaching `diff`'s changed fields.
    pub async fn write_diff<'c, E: Auditable>(
        &self,
        tx: &mut Transaction<'c, Postgres>,
        action: &str,
        entity: &E,
        realm_id: Option<i64>,
        diff: &DiffSet,
    ) -> DbResult<AuditEntry> {
        let diff_json = if diff.is_empty() {
            json!({ "entity": entity.audit_display() })
        } else {
            json!({
                "entity": entity.audit_display(),
                "fields": diff
                    .diffs()
                    .iter()
                    .map(|d| json!({ "field": d.field, "before": d.before, "after": d.after }))
                    .collect::<Vec<_>>(),
            })
        };

        let entry = sqlx::query_as::<_, AuditEntry>(
            r#"
            INSERT INTO audit_entries (actor_id, action, target_id, realm_id, diff)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&self.actor_id)
        .bind(action)
        .bind(entity.audit_id())
        .bind(realm_id)
        .bind(diff_json)
        .fetch_one(&mut **tx)
        .await?;

        Ok(entry)
    }
}

/// Read-side queries over the audit log, indexed the way spec §4.8 requires
/// (by realm, actor, or target).
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// Entries for a realm, most recent first.
    pub async fn by_realm(
        &self,
        realm_id: i64,
        limit: i64,
        token: &CancellationToken,
    ) -> DbResult<Vec<AuditEntry>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, AuditEntry>(
                "SELECT * FROM audit_entries WHERE realm_id = $1 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(realm_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Entries written by a given actor, most recent first.
    pub async fn by_actor(
        &self,
        actor_id: &str,
        limit: i64,
        token: &CancellationToken,
    ) -> DbResult<Vec<AuditEntry>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, AuditEntry>(
                "SELECT * FROM audit_entries WHERE actor_id = $1 ORDER BY created_at DESC LIMIT $2",
            )
            .bind(actor_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Entries describing changes to a specific target entity.
    pub async fn by_target(
        &self,
        target_id: &str,
        token: &CancellationToken,
    ) -> DbResult<Vec<AuditEntry>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, AuditEntry>(
                "SELECT * FROM audit_entries WHERE target_id = $1 ORDER BY created_at DESC",
            )
            .bind(target_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing;
    impl Auditable for Thing {
        fn audit_id(&self) -> String {
            "thing-1".to_string()
        }
        fn audit_display(&self) -> String {
            "thing:thing-1".to_string()
        }
    }

    #[test]
    fn repositories_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuditRepository>();
        assert_send_sync::<AuditWriter>();
    }

    #[test]
    fn empty_diff_still_names_the_entity() {
        let diff = DiffSet::new();
        let entity = Thing;
        let json = json!({ "entity": entity.audit_display() });
        assert_eq!(json["entity"], "thing:thing-1");
        assert!(diff.is_empty());
    }
}
