//! Error types shared across the Verihold persistence and security layer.

use thiserror::Error;

/// The main error type for core-level operations (validation, audit diffing,
/// subject parsing). Storage- and crypto-specific errors live in their own
/// crates and convert into this one only where a caller needs a unified type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A save-time validation hook rejected the entity.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// A `Subject` string failed to parse.
    #[error("invalid subject encoding: {0}")]
    InvalidSubject(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with custom message.
    #[error("{0}")]
    Custom(String),
}

/// Specialized `Result` for core-level operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Per-field validation errors accumulated by the "Errorable" mixin
/// (spec §4, "Validation hooks"). Mirrors the shape of a form-validation
/// error bag: one or more messages per offending field.
#[derive(Error, Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: Vec<(String, String)>,
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .fields
            .iter()
            .map(|(field, msg)| format!("{field}: {msg}"))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{joined}")
    }
}

impl ValidationErrors {
    /// An empty error bag (no validation failures).
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a validation failure against a field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.push((field.into(), message.into()));
    }

    /// True if no field has recorded an error.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate `(field, message)` pairs in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(f, m)| (f.as_str(), m.as_str()))
    }

    /// Messages recorded against a specific field.
    pub fn for_field<'a>(&'a self, field: &str) -> Vec<&'a str> {
        self.fields
            .iter()
            .filter(|(f, _)| f == field)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    /// Convert to `Result`: `Ok(())` if empty, `Err(self)` otherwise.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Merge another error bag into this one.
    pub fn merge(&mut self, other: ValidationErrors) {
        self.fields.extend(other.fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_by_default() {
        assert!(ValidationErrors::new().is_empty());
    }

    #[test]
    fn records_and_displays_fields() {
        let mut errs = ValidationErrors::new();
        errs.add("name", "must not be empty");
        errs.add("code_length", "must be at least 6");
        assert!(!errs.is_empty());
        assert_eq!(errs.for_field("name"), vec!["must not be empty"]);
        assert_eq!(
            errs.to_string(),
            "name: must not be empty; code_length: must be at least 6"
        );
    }

    #[test]
    fn into_result_roundtrips() {
        assert!(ValidationErrors::new().into_result().is_ok());
        let mut errs = ValidationErrors::new();
        errs.add("x", "bad");
        assert!(errs.into_result().is_err());
    }

    #[test]
    fn merge_combines_fields() {
        let mut a = ValidationErrors::new();
        a.add("a", "1");
        let mut b = ValidationErrors::new();
        b.add("b", "2");
        a.merge(b);
        assert_eq!(a.iter().count(), 2);
    }
}
