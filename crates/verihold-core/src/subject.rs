//! The `Subject` bound to a verification code and its token (spec GLOSSARY).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bitset::bitflags_like;
use crate::error::{CoreError, CoreResult};

bitflags_like! {
    /// Test types a realm may accept, and that a code/token is issued for.
    ///
    /// Modeled as a bitfield (spec §3, Realm.allowed_test_types) rather than
    /// an open enum so a realm's policy can be stored as a single integer
    /// column and checked with a cheap bitwise AND.
    TestType {
        CONFIRMED = 0b0001,
        LIKELY = 0b0010,
        NEGATIVE = 0b0100,
        USER_REPORT = 0b1000,
    }
}

impl TestType {
    /// Canonical wire name used in `Subject::to_string`/`FromStr`.
    pub fn as_str(self) -> &'static str {
        match self {
            TestType::CONFIRMED => "confirmed",
            TestType::LIKELY => "likely",
            TestType::NEGATIVE => "negative",
            TestType::USER_REPORT => "user-report",
            _ => "unknown",
        }
    }

    /// Parse a single canonical test type name (not a bitmask).
    pub fn from_name(name: &str) -> CoreResult<Self> {
        match name {
            "confirmed" => Ok(TestType::CONFIRMED),
            "likely" => Ok(TestType::LIKELY),
            "negative" => Ok(TestType::NEGATIVE),
            "user-report" => Ok(TestType::USER_REPORT),
            other => Err(CoreError::InvalidSubject(format!(
                "unrecognized test type {other:?}"
            ))),
        }
    }
}

/// The `{test type, symptom date, test date}` tuple bound to a token
/// (spec GLOSSARY, §4.3 step 5 / `ClaimToken` subject-equality check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Test type the code/token was issued for.
    pub test_type: TestType,
    /// Optional symptom onset date.
    pub symptom_date: Option<NaiveDate>,
    /// Optional test administration date.
    pub test_date: Option<NaiveDate>,
}

impl Subject {
    /// Construct a subject.
    pub fn new(test_type: TestType, symptom_date: Option<NaiveDate>, test_date: Option<NaiveDate>) -> Self {
        Self { test_type, symptom_date, test_date }
    }

    /// The §4.3/§8 equality rule used by `ClaimToken`: test type equal;
    /// symptom date both-nil or both-equal; test date both-nil or
    /// both-equal. Any divergence should surface as `TokenMetadataMismatch`
    /// in the caller.
    pub fn matches(&self, other: &Subject) -> bool {
        self.test_type == other.test_type
            && self.symptom_date == other.symptom_date
            && self.test_date == other.test_date
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.test_type.as_str(),
            self.symptom_date.map(|d| d.to_string()).unwrap_or_default(),
            self.test_date.map(|d| d.to_string()).unwrap_or_default(),
        )
    }
}

impl FromStr for Subject {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let mut parts = s.splitn(3, '|');
        let test_type = TestType::from_name(parts.next().unwrap_or_default())?;
        let symptom_date = parse_optional_date(parts.next().unwrap_or_default())?;
        let test_date = parse_optional_date(parts.next().unwrap_or_default())?;
        Ok(Subject { test_type, symptom_date, test_date })
    }
}

fn parse_optional_date(s: &str) -> CoreResult<Option<NaiveDate>> {
    if s.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| CoreError::InvalidSubject(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_bitfield_contains() {
        let allowed = TestType::CONFIRMED | TestType::LIKELY;
        assert!(allowed.contains(TestType::CONFIRMED));
        assert!(!allowed.contains(TestType::NEGATIVE));
    }

    #[test]
    fn subject_round_trips_through_string() {
        let subjects = [
            Subject::new(TestType::CONFIRMED, None, None),
            Subject::new(
                TestType::LIKELY,
                Some(NaiveDate::from_ymd_opt(2020, 2, 3).unwrap()),
                None,
            ),
            Subject::new(
                TestType::NEGATIVE,
                Some(NaiveDate::from_ymd_opt(2020, 2, 3).unwrap()),
                Some(NaiveDate::from_ymd_opt(2020, 2, 5).unwrap()),
            ),
        ];
        for subject in subjects {
            let parsed: Subject = subject.to_string().parse().unwrap();
            assert_eq!(parsed, subject);
        }
    }

    #[test]
    fn matches_requires_full_tuple_equality() {
        let a = Subject::new(TestType::CONFIRMED, None, None);
        let b = Subject::new(
            TestType::CONFIRMED,
            Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
            None,
        );
        assert!(!a.matches(&b));
        assert!(a.matches(&a));
    }
}
