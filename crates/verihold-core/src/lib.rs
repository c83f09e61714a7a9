//! # Verihold Core
//!
//! Shared vocabulary for the Verihold verification-code persistence and
//! security layer: the error taxonomy, the save-time validation mixin, the
//! audit-diff helpers every repository writes through, the `Subject` bound
//! to a code/token pair, and the bitfield permission and test-type sets
//! stored as single integer columns.
//!
//! This crate has no database or cryptography dependency — `verihold-db`
//! and `verihold-crypto` both depend on it, not the other way around.
//!
//! ## Quick start
//!
//! ```ignore
//! use verihold_core::prelude::*;
//!
//! let subject = Subject::new(TestType::CONFIRMED, None, None);
//! let rendered = subject.to_string();
//! let parsed: Subject = rendered.parse().unwrap();
//! assert_eq!(subject, parsed);
//! ```

#![warn(missing_docs)]

pub mod audit;
mod bitset;
pub mod error;
pub mod permissions;
pub mod subject;
pub mod validation;

/// Convenient imports for consumers of this crate.
pub mod prelude {
    //! Prelude module for convenient imports.
    //!
    //! ```ignore
    //! use verihold_core::prelude::*;
    //! ```

    pub use crate::audit::{Auditable, DiffSet, FieldDiff};
    pub use crate::error::{CoreError, CoreResult, ValidationErrors};
    pub use crate::permissions::Permission;
    pub use crate::subject::{Subject, TestType};
    pub use crate::validation::Validatable;
}

/// The version of the Verihold Core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
