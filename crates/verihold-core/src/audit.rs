//! Audit vocabulary shared by every repository that writes an `AuditEntry`
//! row in the same transaction as its mutating write (spec §4.8).
//!
//! The row shape itself (`AuditEntry`, with its `realm_id`/`actor`/`action`
//! columns) lives in `verihold-db` since it is `FromRow`-backed; this module
//! holds the capability entities implement to describe themselves to the
//! audit log, plus the diff helpers that turn an old/new field pair into the
//! human-readable change lines an `AuditEntry.diff` column stores.

/// Implemented by entities that can appear on either side of an audit
/// entry (the thing that changed). Grounded on the `AuditEvent`
/// resource_type/resource_id pairing in `meridian-auth`'s audit log, but
/// narrowed to the two methods a diff actually needs.
pub trait Auditable {
    /// A stable identifier for this entity (e.g. its UUID as a string).
    fn audit_id(&self) -> String;

    /// A short human-readable label for this entity, used in audit entry
    /// messages (e.g. `"realm:acme-county"`).
    fn audit_display(&self) -> String;
}

/// One changed field, rendered for an `AuditEntry.diff` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    /// Name of the field that changed.
    pub field: String,
    /// Previous value, rendered as a string (`None` if the field was unset).
    pub before: Option<String>,
    /// New value, rendered as a string (`None` if the field was cleared).
    pub after: Option<String>,
}

impl std::fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {:?} -> {:?}",
            self.field,
            self.before.as_deref().unwrap_or("<unset>"),
            self.after.as_deref().unwrap_or("<unset>"),
        )
    }
}

/// Accumulates `FieldDiff`s across a save, to be flattened into an
/// `AuditEntry.diff` string column.
#[derive(Debug, Clone, Default)]
pub struct DiffSet {
    diffs: Vec<FieldDiff>,
}

impl DiffSet {
    /// An empty diff set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a string field change, skipping no-op writes.
    pub fn string_field(&mut self, field: &str, before: &str, after: &str) {
        if before != after {
            self.diffs.push(FieldDiff {
                field: field.to_string(),
                before: Some(before.to_string()),
                after: Some(after.to_string()),
            });
        }
    }

    /// Record an optional string field change, skipping no-op writes.
    pub fn optional_string_field(
        &mut self,
        field: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) {
        if before != after {
            self.diffs.push(FieldDiff {
                field: field.to_string(),
                before: before.map(str::to_string),
                after: after.map(str::to_string),
            });
        }
    }

    /// Record a boolean field change, skipping no-op writes.
    pub fn bool_field(&mut self, field: &str, before: bool, after: bool) {
        if before != after {
            self.diffs.push(FieldDiff {
                field: field.to_string(),
                before: Some(before.to_string()),
                after: Some(after.to_string()),
            });
        }
    }

    /// True if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    /// Render every recorded diff as one newline-joined string, the shape
    /// an `AuditEntry.diff` column stores.
    pub fn render(&self) -> String {
        self.diffs
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The recorded diffs, in the order they were added.
    pub fn diffs(&self) -> &[FieldDiff] {
        &self.diffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_writes_are_skipped() {
        let mut diffs = DiffSet::new();
        diffs.string_field("name", "acme", "acme");
        diffs.bool_field("active", true, true);
        assert!(diffs.is_empty());
    }

    #[test]
    fn changed_fields_render_in_order() {
        let mut diffs = DiffSet::new();
        diffs.string_field("name", "acme", "acme-county");
        diffs.bool_field("active", true, false);
        assert_eq!(diffs.diffs().len(), 2);
        assert_eq!(
            diffs.render(),
            "name: \"acme\" -> \"acme-county\"\nactive: \"true\" -> \"false\""
        );
    }

    #[test]
    fn optional_string_field_tracks_set_and_clear() {
        let mut diffs = DiffSet::new();
        diffs.optional_string_field("note", None, Some("hello"));
        diffs.optional_string_field("other", Some("x"), None);
        assert_eq!(diffs.diffs().len(), 2);
    }
}
