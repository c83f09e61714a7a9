//! Persistence-layer entities (spec §3).
//!
//! Every entity carries a numeric surrogate id, `created_at`, `updated_at`,
//! and (where soft-deletable) a nullable `deleted_at`. Enum-shaped columns
//! (`api_key_type`, secret `type`, …) are stored as plain text and parsed on
//! demand rather than mapped through a custom Postgres enum type, matching
//! the teacher's plain-`String`-column convention (`Layer::layer_type`,
//! `Layer::geometry_type`).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use verihold_core::audit::Auditable;
use verihold_core::error::{CoreError, CoreResult, ValidationErrors};
use verihold_core::permissions::Permission;
use verihold_core::subject::{Subject, TestType};
use verihold_core::validation::{require_in_range, require_non_empty, Validatable};

/// API-key holder kind (spec §3 `AuthorizedApp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiKeyType {
    /// A mobile/desktop client minting codes on a user's behalf.
    Device,
    /// A backoffice client with elevated realm administration access.
    Admin,
}

impl ApiKeyType {
    /// The string stored in the `api_key_type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            ApiKeyType::Device => "device",
            ApiKeyType::Admin => "admin",
        }
    }

    /// Parse a stored `api_key_type` value.
    pub fn from_str(value: &str) -> CoreResult<Self> {
        match value {
            "device" => Ok(ApiKeyType::Device),
            "admin" => Ok(ApiKeyType::Admin),
            other => Err(CoreError::Custom(format!("unknown api_key_type: {other}"))),
        }
    }
}

/// Secret purpose (spec §3 `Secret`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretType {
    ApiKeyDatabaseHmac,
    ApiKeySignatureHmac,
    CookieKeys,
    PhoneNumberDatabaseHmac,
    VerificationCodeDatabaseHmac,
}

impl SecretType {
    /// The string stored in the `type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            SecretType::ApiKeyDatabaseHmac => "api_key_database_hmac",
            SecretType::ApiKeySignatureHmac => "api_key_signature_hmac",
            SecretType::CookieKeys => "cookie_keys",
            SecretType::PhoneNumberDatabaseHmac => "phone_number_database_hmac",
            SecretType::VerificationCodeDatabaseHmac => "verification_code_database_hmac",
        }
    }

    /// Parse a stored `type` value.
    pub fn from_str(value: &str) -> CoreResult<Self> {
        match value {
            "api_key_database_hmac" => Ok(SecretType::ApiKeyDatabaseHmac),
            "api_key_signature_hmac" => Ok(SecretType::ApiKeySignatureHmac),
            "cookie_keys" => Ok(SecretType::CookieKeys),
            "phone_number_database_hmac" => Ok(SecretType::PhoneNumberDatabaseHmac),
            "verification_code_database_hmac" => Ok(SecretType::VerificationCodeDatabaseHmac),
            other => Err(CoreError::Custom(format!("unknown secret type: {other}"))),
        }
    }
}

/// A tenant. All issuance is scoped to one realm.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Realm {
    pub id: i64,
    pub name: String,
    pub region_code: Option<String>,
    pub code_length: i32,
    pub code_duration_seconds: i64,
    pub long_code_length: i32,
    pub long_code_duration_seconds: i64,
    pub sms_text_template: String,
    /// Bitfield over `TestType` (spec §3 `allowed_test_types`).
    pub allowed_test_types: i32,
    pub certificate_issuer: Option<String>,
    pub certificate_audience: Option<String>,
    pub abuse_prevention_enabled: bool,
    pub abuse_prevention_limit: i32,
    pub mfa_mode: String,
    pub email_verification_mode: String,
    pub use_system_sms_config: bool,
    pub use_system_email_config: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Hard ceiling on `code_duration_seconds` (spec §3: `code_duration≤1h`).
pub const MAX_CODE_DURATION_SECONDS: i64 = 3600;
/// Hard ceiling on `long_code_duration_seconds` (spec §3: `≤24h`).
pub const MAX_LONG_CODE_DURATION_SECONDS: i64 = 24 * 3600;

impl Realm {
    /// Bitfield accessor for `allowed_test_types`.
    pub fn allowed_test_types(&self) -> TestType {
        TestType::from_bits(self.allowed_test_types)
    }

    /// Trim `name` and `region_code`, upper-case `region_code` (spec §3
    /// save-time normalization). Call before validating/persisting.
    pub fn normalize(&mut self) {
        self.name = self.name.trim().to_string();
        self.region_code = self
            .region_code
            .as_ref()
            .map(|r| r.trim().to_uppercase())
            .filter(|r| !r.is_empty());
    }
}

impl Validatable for Realm {
    fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        require_non_empty(&mut errors, "name", &self.name);
        if let Some(region) = &self.region_code {
            if region.len() > 10 {
                errors.add("region_code", "must be at most 10 characters");
            }
        }
        require_in_range(&mut errors, "code_length", self.code_length as i64, 6, i64::MAX);
        require_in_range(
            &mut errors,
            "code_duration_seconds",
            self.code_duration_seconds,
            1,
            MAX_CODE_DURATION_SECONDS,
        );
        require_in_range(&mut errors, "long_code_length", self.long_code_length as i64, 12, i64::MAX);
        require_in_range(
            &mut errors,
            "long_code_duration_seconds",
            self.long_code_duration_seconds,
            1,
            MAX_LONG_CODE_DURATION_SECONDS,
        );
        let has_code_placeholder = self.sms_text_template.contains("[code]");
        let has_longcode_placeholder = self.sms_text_template.contains("[longcode]");
        if has_code_placeholder == has_longcode_placeholder {
            errors.add(
                "sms_text_template",
                "must contain exactly one of [code] or [longcode]",
            );
        }
        errors
    }
}

impl Auditable for Realm {
    fn audit_id(&self) -> String {
        self.id.to_string()
    }
    fn audit_display(&self) -> String {
        format!("realm:{}", self.name)
    }
}

/// An API-key-holding client, realm-scoped (spec §3 `AuthorizedApp`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthorizedApp {
    pub id: i64,
    pub realm_id: i64,
    pub name: String,
    /// HMAC of the opaque key, never the plaintext (spec §4.2).
    pub api_key: Vec<u8>,
    /// First six characters of the opaque key, for UI identification only.
    pub api_key_preview: String,
    pub api_key_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AuthorizedApp {
    /// Typed accessor for `api_key_type`.
    pub fn key_type(&self) -> CoreResult<ApiKeyType> {
        ApiKeyType::from_str(&self.api_key_type)
    }
}

impl Validatable for AuthorizedApp {
    fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        require_non_empty(&mut errors, "name", &self.name);
        if ApiKeyType::from_str(&self.api_key_type).is_err() {
            errors.add("api_key_type", "must be one of device, admin");
        }
        errors
    }
}

impl Auditable for AuthorizedApp {
    fn audit_id(&self) -> String {
        self.id.to_string()
    }
    fn audit_display(&self) -> String {
        format!("authorized_app:{}", self.name)
    }
}

/// A one-time pair of realm-scoped secrets (spec §3 `VerificationCode`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VerificationCode {
    pub id: i64,
    pub realm_id: i64,
    pub uuid: uuid::Uuid,
    /// HMAC of the short code; empty once recycled.
    pub code: Vec<u8>,
    /// HMAC of the long code; empty once recycled.
    pub long_code: Vec<u8>,
    pub claimed: bool,
    pub test_type: i32,
    pub symptom_date: Option<NaiveDate>,
    pub test_date: Option<NaiveDate>,
    pub expires_at: DateTime<Utc>,
    pub long_expires_at: DateTime<Utc>,
    pub issuing_user_id: Option<i64>,
    pub issuing_app_id: Option<i64>,
    pub issuing_external_id: Option<String>,
    pub user_report_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationCode {
    /// The bound test type.
    pub fn test_type(&self) -> TestType {
        TestType::from_bits(self.test_type)
    }

    /// This code's subject tuple (spec GLOSSARY `Subject`).
    pub fn subject(&self) -> Subject {
        Subject::new(self.test_type(), self.symptom_date, self.test_date)
    }

    /// True once both the short and long code have been blanked by a
    /// recycle pass, while the row (and its `uuid`) still exists.
    pub fn is_recycled(&self) -> bool {
        self.code.is_empty() && self.long_code.is_empty()
    }
}

impl Validatable for VerificationCode {
    fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.long_expires_at < self.expires_at {
            errors.add("long_expires_at", "must be on or after expires_at");
        }
        errors
    }
}

impl Auditable for VerificationCode {
    fn audit_id(&self) -> String {
        self.uuid.to_string()
    }
    fn audit_display(&self) -> String {
        format!("verification_code:{}", self.uuid)
    }
}

/// A single-use bearer artifact minted on successful code exchange (spec §3
/// `Token`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Token {
    pub id: i64,
    pub realm_id: i64,
    /// Opaque, non-guessable identifier (raw-base64 of 96 random bytes).
    pub token_id: String,
    pub test_type: i32,
    pub symptom_date: Option<NaiveDate>,
    pub test_date: Option<NaiveDate>,
    pub used: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    /// The bound test type.
    pub fn test_type(&self) -> TestType {
        TestType::from_bits(self.test_type)
    }

    /// This token's subject tuple.
    pub fn subject(&self) -> Subject {
        Subject::new(self.test_type(), self.symptom_date, self.test_date)
    }
}

impl Auditable for Token {
    fn audit_id(&self) -> String {
        self.token_id.clone()
    }
    fn audit_display(&self) -> String {
        format!("token:{}", self.token_id)
    }
}

/// A self-reported phone-hash + nonce challenge record (spec §3
/// `UserReport`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserReport {
    pub id: i64,
    pub phone_hash: Vec<u8>,
    /// Decoded nonce bytes; fixed length 256 (spec §3).
    pub nonce: Vec<u8>,
    pub nonce_required: bool,
    pub code_claimed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Length every `UserReport::nonce` must decode to (spec §3).
pub const USER_REPORT_NONCE_LEN: usize = 256;

impl Validatable for UserReport {
    fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if self.nonce.len() != USER_REPORT_NONCE_LEN {
            errors.add("nonce", "must decode to exactly 256 bytes");
        }
        errors
    }
}

impl Auditable for UserReport {
    fn audit_id(&self) -> String {
        self.id.to_string()
    }
    fn audit_display(&self) -> String {
        "user_report".to_string()
    }
}

/// A reference to externally-managed secret material, consumable in
/// active-first-by-created_at order (spec §3 `Secret`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Secret {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub secret_type: String,
    /// Pointer into the external secret manager (resolved via
    /// `verihold_crypto::secretmanager::SecretManager`).
    pub reference: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Secret {
    /// Typed accessor for `secret_type`.
    pub fn kind(&self) -> CoreResult<SecretType> {
        SecretType::from_str(&self.secret_type)
    }
}

impl Validatable for Secret {
    fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        if SecretType::from_str(&self.secret_type).is_err() {
            errors.add("type", "must be a recognized secret type");
        }
        require_non_empty(&mut errors, "reference", &self.reference);
        errors
    }
}

/// Orders secrets active-first, then by `created_at` ascending, matching
/// spec §3's staged-rollout consumption order. Sort key only — callers
/// apply it with `slice::sort_by_key` or an `ORDER BY` clause of the same
/// shape (`active DESC, created_at ASC`).
pub fn secret_consumption_order(a: &Secret, b: &Secret) -> std::cmp::Ordering {
    b.active.cmp(&a.active).then(a.created_at.cmp(&b.created_at))
}

/// A user's realm membership and permission bitmask (spec §3
/// `Memberships`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: i64,
    pub user_id: i64,
    pub realm_id: i64,
    pub permissions: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    /// Bitfield accessor for `permissions`.
    pub fn permissions(&self) -> Permission {
        Permission::from_bits(self.permissions)
    }
}

impl Auditable for Membership {
    fn audit_id(&self) -> String {
        self.id.to_string()
    }
    fn audit_display(&self) -> String {
        format!("membership:{}:{}", self.user_id, self.realm_id)
    }
}

/// A realm-scoped signing key handle (spec §3 `SigningKey`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SigningKey {
    pub id: i64,
    pub realm_id: i64,
    pub key_id: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Realm-level SMS provider configuration (spec §3 `SMSConfig`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SMSConfig {
    pub id: i64,
    pub realm_id: Option<i64>,
    pub provider: String,
    pub twilio_account_sid: Option<String>,
    /// Base64 of an AES-256-GCM envelope; see `repo::sms_config::SmsConfigRepository`.
    pub twilio_auth_token_ciphertext: Option<String>,
    pub twilio_from_number: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Realm-level email provider configuration (spec §3 `EmailConfig`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EmailConfig {
    pub id: i64,
    pub realm_id: Option<i64>,
    pub provider: String,
    pub smtp_host: Option<String>,
    /// Base64 of an AES-256-GCM envelope; see `repo::email_config::EmailConfigRepository`.
    pub smtp_account_ciphertext: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An append-only record of a mutation to a security-relevant entity (spec
/// §3, §4.8 `AuditEntry`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: Option<String>,
    pub action: String,
    pub target_id: String,
    pub realm_id: Option<i64>,
    pub diff: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A cooperative named lease (spec §3, §4.4 `LockStatus`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LockStatus {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub lock_type: String,
    pub generation: i64,
    pub not_before: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Daily per-realm counters (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RealmStat {
    pub date: NaiveDate,
    pub realm_id: i64,
    pub codes_issued: i64,
    pub codes_claimed: i64,
    pub codes_invalid: i64,
    pub tokens_claimed: i64,
    pub tokens_invalid: i64,
    pub user_reports_issued: i64,
    pub user_reports_claimed: i64,
    /// Claim-age bucket counts, in the fixed boundary order described at
    /// [`crate::repo::stats::CLAIM_AGE_BUCKETS`].
    pub claim_age_buckets: Vec<i64>,
    pub claim_age_mean_seconds: f64,
    pub claim_age_sample_count: i64,
}

/// Daily per-app counters (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthorizedAppStat {
    pub date: NaiveDate,
    pub authorized_app_id: i64,
    pub codes_issued: i64,
    pub codes_claimed: i64,
    pub codes_invalid: i64,
    pub tokens_claimed: i64,
    pub tokens_invalid: i64,
}

/// Daily per-user counters (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserStat {
    pub date: NaiveDate,
    pub realm_id: i64,
    pub user_id: i64,
    pub codes_issued: i64,
}

/// Daily per-external-issuer counters (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExternalIssuerStat {
    pub date: NaiveDate,
    pub realm_id: i64,
    pub issuer_id: String,
    pub codes_issued: i64,
}

/// Process-wide key-server usage counters, not realm-scoped.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KeyServerStats {
    pub date: NaiveDate,
    pub requests: i64,
    pub errors: i64,
}

/// A recorded chaff (decoy) request against a realm, used to size abuse
/// detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RealmChaffEvent {
    pub id: i64,
    pub realm_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A realm-owned SMS sender number.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SMSFromNumber {
    pub id: i64,
    pub realm_id: i64,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
}

/// A signing key scoped to outbound SMS delivery.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SMSSigningKey {
    pub id: i64,
    pub realm_id: i64,
    pub key_id: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A signing key scoped to token issuance.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TokenSigningKey {
    pub id: i64,
    pub realm_id: i64,
    pub key_id: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A registered mobile client bundle/app-store identity for a realm.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MobileApp {
    pub id: i64,
    pub realm_id: i64,
    pub name: String,
    pub os: String,
    pub app_store_id: Option<String>,
    pub sha256_cert_fingerprints: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Pagination parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    /// Page number (0-indexed).
    pub page: u32,
    /// Items per page.
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 0, page_size: 100 }
    }
}

impl Pagination {
    /// Create new pagination parameters.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// Row offset implied by `page`/`page_size`.
    pub fn offset(&self) -> u32 {
        self.page * self.page_size
    }

    /// Row limit implied by `page_size`.
    pub fn limit(&self) -> u32 {
        self.page_size
    }
}

/// A page of results with enough metadata to build the next request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    /// Build a page from its items, the total row count, and the
    /// pagination request that produced it.
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let total_pages = ((total as f64) / (pagination.page_size as f64)).ceil() as u32;
        Self { items, total, page: pagination.page, page_size: pagination.page_size, total_pages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_realm() -> Realm {
        Realm {
            id: 1,
            name: "  Test Realm  ".to_string(),
            region_code: Some(" us ".to_string()),
            code_length: 6,
            code_duration_seconds: 900,
            long_code_length: 16,
            long_code_duration_seconds: 86_400,
            sms_text_template: "Your code is [code]".to_string(),
            allowed_test_types: TestType::CONFIRMED.bits(),
            certificate_issuer: None,
            certificate_audience: None,
            abuse_prevention_enabled: false,
            abuse_prevention_limit: 0,
            mfa_mode: "optional".to_string(),
            email_verification_mode: "optional".to_string(),
            use_system_sms_config: true,
            use_system_email_config: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn realm_normalize_trims_and_upcases_region() {
        let mut realm = base_realm();
        realm.normalize();
        assert_eq!(realm.name, "Test Realm");
        assert_eq!(realm.region_code.as_deref(), Some("US"));
    }

    #[test]
    fn realm_rejects_duration_beyond_ceiling() {
        let mut realm = base_realm();
        realm.code_duration_seconds = MAX_CODE_DURATION_SECONDS + 1;
        assert!(!realm.validate().is_empty());
    }

    #[test]
    fn realm_rejects_template_with_both_placeholders() {
        let mut realm = base_realm();
        realm.sms_text_template = "[code] or [longcode]".to_string();
        assert!(!realm.validate().is_empty());
    }

    #[test]
    fn realm_rejects_template_with_neither_placeholder() {
        let mut realm = base_realm();
        realm.sms_text_template = "no placeholder here".to_string();
        assert!(!realm.validate().is_empty());
    }

    #[test]
    fn verification_code_rejects_long_expiry_before_short() {
        let now = Utc::now();
        let code = VerificationCode {
            id: 1,
            realm_id: 1,
            uuid: uuid::Uuid::new_v4(),
            code: vec![1, 2, 3],
            long_code: vec![4, 5, 6],
            claimed: false,
            test_type: TestType::CONFIRMED.bits(),
            symptom_date: None,
            test_date: None,
            expires_at: now + chrono::Duration::hours(1),
            long_expires_at: now,
            issuing_user_id: None,
            issuing_app_id: Some(1),
            issuing_external_id: None,
            user_report_id: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!code.validate().is_empty());
    }

    #[test]
    fn verification_code_is_recycled_once_both_secrets_blank() {
        let now = Utc::now();
        let mut code = VerificationCode {
            id: 1,
            realm_id: 1,
            uuid: uuid::Uuid::new_v4(),
            code: vec![1, 2, 3],
            long_code: vec![4, 5, 6],
            claimed: false,
            test_type: TestType::CONFIRMED.bits(),
            symptom_date: None,
            test_date: None,
            expires_at: now,
            long_expires_at: now,
            issuing_user_id: None,
            issuing_app_id: Some(1),
            issuing_external_id: None,
            user_report_id: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!code.is_recycled());
        code.code.clear();
        code.long_code.clear();
        assert!(code.is_recycled());
    }

    #[test]
    fn secret_consumption_order_prefers_active_then_oldest() {
        let now = Utc::now();
        let mut secrets = vec![
            Secret {
                id: 1,
                secret_type: SecretType::ApiKeyDatabaseHmac.as_str().to_string(),
                reference: "ref-inactive-new".to_string(),
                active: false,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
            Secret {
                id: 2,
                secret_type: SecretType::ApiKeyDatabaseHmac.as_str().to_string(),
                reference: "ref-active-old".to_string(),
                active: true,
                created_at: now - chrono::Duration::days(1),
                updated_at: now,
                deleted_at: None,
            },
            Secret {
                id: 3,
                secret_type: SecretType::ApiKeyDatabaseHmac.as_str().to_string(),
                reference: "ref-active-new".to_string(),
                active: true,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        ];
        secrets.sort_by(secret_consumption_order);
        assert_eq!(secrets[0].reference, "ref-active-old");
        assert_eq!(secrets[1].reference, "ref-active-new");
        assert_eq!(secrets[2].reference, "ref-inactive-new");
    }

    #[test]
    fn user_report_rejects_wrong_nonce_length() {
        let now = Utc::now();
        let report = UserReport {
            id: 1,
            phone_hash: vec![0; 32],
            nonce: vec![0; 10],
            nonce_required: true,
            code_claimed: false,
            created_at: now,
            updated_at: now,
        };
        assert!(!report.validate().is_empty());
    }
}
