//! Realm SMS provider configuration (spec §3 `SMSConfig`, §4.5 envelope
//! encryption): the Twilio auth token is never written to or read from
//! Postgres in plaintext — every save and load round-trips it through a
//! [`ColumnCipher`].

use crate::error::{DbError, DbResult};
use crate::models::SMSConfig;
use crate::pool::Pool;
use crate::repo::cancellable;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use verihold_crypto::envelope::{ColumnCipher, EncryptionMemo};

const TABLE: &str = "sms_configs";
const COLUMN: &str = "twilio_auth_token_ciphertext";

/// Repository for the `sms_configs` table.
pub struct SmsConfigRepository {
    pool: PgPool,
}

impl SmsConfigRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// Save a realm's (or the system's, if `config.realm_id` is `None`) SMS
    /// config, encrypting `plaintext_auth_token` under `key_id` before it
    /// ever reaches a query parameter. Pass the memo back in on a
    /// subsequent save of the same config to skip re-encrypting an
    /// unchanged token.
    pub async fn upsert(
        &self,
        mut config: SMSConfig,
        plaintext_auth_token: Option<&str>,
        cipher: &ColumnCipher,
        key_id: &str,
        memo: &mut EncryptionMemo,
        token: &CancellationToken,
    ) -> DbResult<SMSConfig> {
        if let Some(plaintext) = plaintext_auth_token {
            let ciphertext = cipher.encrypt(key_id, COLUMN, plaintext.as_bytes(), memo).await?;
            config.twilio_auth_token_ciphertext = Some(STANDARD.encode(ciphertext));
        }

        cancellable(token, async {
            Ok(sqlx::query_as::<_, SMSConfig>(
                r#"
                INSERT INTO sms_configs (id, realm_id, provider, twilio_account_sid, twilio_auth_token_ciphertext, twilio_from_number, is_system)
                VALUES (COALESCE(NULLIF($1, 0), DEFAULT), $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE SET
                    provider = EXCLUDED.provider,
                    twilio_account_sid = EXCLUDED.twilio_account_sid,
                    twilio_auth_token_ciphertext = EXCLUDED.twilio_auth_token_ciphertext,
                    twilio_from_number = EXCLUDED.twilio_from_number,
                    is_system = EXCLUDED.is_system,
                    updated_at = NOW()
                RETURNING *
                "#,
            )
            .bind(config.id)
            .bind(config.realm_id)
            .bind(&config.provider)
            .bind(&config.twilio_account_sid)
            .bind(&config.twilio_auth_token_ciphertext)
            .bind(&config.twilio_from_number)
            .bind(config.is_system)
            .fetch_one(&self.pool)
            .await?)
        })
        .await
    }

    /// Find a realm's SMS config, if one is configured.
    pub async fn find_by_realm(&self, realm_id: i64, token: &CancellationToken) -> DbResult<Option<SMSConfig>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, SMSConfig>("SELECT * FROM sms_configs WHERE realm_id = $1")
                .bind(realm_id)
                .fetch_optional(&self.pool)
                .await?)
        })
        .await
    }

    /// The system-wide SMS config, used by realms with
    /// `use_system_sms_config = true`.
    pub async fn find_system(&self, token: &CancellationToken) -> DbResult<Option<SMSConfig>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, SMSConfig>("SELECT * FROM sms_configs WHERE is_system = true")
                .fetch_optional(&self.pool)
                .await?)
        })
        .await
    }

    /// Decrypt `config`'s auth token, if one is set. Populates `memo` so a
    /// following `upsert` of the same token is a no-op re-encryption.
    pub async fn decrypt_auth_token(
        &self,
        config: &SMSConfig,
        cipher: &ColumnCipher,
        key_id: &str,
        memo: &mut EncryptionMemo,
    ) -> DbResult<Option<String>> {
        let Some(ciphertext_b64) = &config.twilio_auth_token_ciphertext else { return Ok(None) };
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| DbError::Generic(format!("stored SMS auth token ciphertext was not base64: {e}")))?;
        let plaintext = cipher.decrypt(key_id, COLUMN, &ciphertext, memo).await?;
        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|e| DbError::Generic(format!("decrypted SMS auth token was not utf8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use verihold_crypto::keymanager::InMemoryKeyManager;

    #[test]
    fn repository_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SmsConfigRepository>();
    }

    #[tokio::test]
    async fn encrypted_token_is_never_the_plaintext_on_the_wire() {
        let cipher = ColumnCipher::new(Arc::new(InMemoryKeyManager::new()), TABLE);
        let mut memo = EncryptionMemo::new();
        let ciphertext = cipher.encrypt("k1", COLUMN, b"secret-token", &mut memo).await.unwrap();
        assert_ne!(ciphertext, b"secret-token");

        let mut decrypt_memo = EncryptionMemo::new();
        let plaintext = cipher.decrypt("k1", COLUMN, &ciphertext, &mut decrypt_memo).await.unwrap();
        assert_eq!(plaintext, b"secret-token");
    }
}
