//! Realm email provider configuration (spec §3 `EmailConfig`, §4.5 envelope
//! encryption): the SMTP account credential is never written to or read
//! from Postgres in plaintext — every save and load round-trips it through
//! a [`ColumnCipher`].

use crate::error::{DbError, DbResult};
use crate::models::EmailConfig;
use crate::pool::Pool;
use crate::repo::cancellable;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use verihold_crypto::envelope::{ColumnCipher, EncryptionMemo};

const TABLE: &str = "email_configs";
const COLUMN: &str = "smtp_account_ciphertext";

/// Repository for the `email_configs` table.
pub struct EmailConfigRepository {
    pool: PgPool,
}

impl EmailConfigRepository {
    /// Build a repository over `pool`.
    pub fn new(pool: &Pool) -> Self {
        Self { pool: pool.inner().clone() }
    }

    /// Save a realm's (or the system's, if `config.realm_id` is `None`)
    /// email config, encrypting `plaintext_smtp_account` under `key_id`
    /// before it ever reaches a query parameter. Pass the memo back in on a
    /// subsequent save of the same config to skip re-encrypting an
    /// unchanged credential.
    pub async fn upsert(
        &self,
        mut config: EmailConfig,
        plaintext_smtp_account: Option<&str>,
        cipher: &ColumnCipher,
        key_id: &str,
        memo: &mut EncryptionMemo,
        token: &CancellationToken,
    ) -> DbResult<EmailConfig> {
        if let Some(plaintext) = plaintext_smtp_account {
            let ciphertext = cipher.encrypt(key_id, COLUMN, plaintext.as_bytes(), memo).await?;
            config.smtp_account_ciphertext = Some(STANDARD.encode(ciphertext));
        }

        cancellable(token, async {
            Ok(sqlx::query_as::<_, EmailConfig>(
                r#"
                INSERT INTO email_configs (id, realm_id, provider, smtp_host, smtp_account_ciphertext, is_system)
                VALUES (COALESCE(NULLIF($1, 0), DEFAULT), $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE SET
                    provider = EXCLUDED.provider,
                    smtp_host = EXCLUDED.smtp_host,
                    smtp_account_ciphertext = EXCLUDED.smtp_account_ciphertext,
                    is_system = EXCLUDED.is_system,
                    updated_at = NOW()
                RETURNING *
                "#,
            )
            .bind(config.id)
            .bind(config.realm_id)
            .bind(&config.provider)
            .bind(&config.smtp_host)
            .bind(&config.smtp_account_ciphertext)
            .bind(config.is_system)
            .fetch_one(&self.pool)
            .await?)
        })
        .await
    }

    /// Find a realm's email config, if one is configured.
    pub async fn find_by_realm(&self, realm_id: i64, token: &CancellationToken) -> DbResult<Option<EmailConfig>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, EmailConfig>("SELECT * FROM email_configs WHERE realm_id = $1")
                .bind(realm_id)
                .fetch_optional(&self.pool)
                .await?)
        })
        .await
    }

    /// The system-wide email config, used by realms with
    /// `use_system_email_config = true`.
    pub async fn find_system(&self, token: &CancellationToken) -> DbResult<Option<EmailConfig>> {
        cancellable(token, async {
            Ok(sqlx::query_as::<_, EmailConfig>("SELECT * FROM email_configs WHERE is_system = true")
                .fetch_optional(&self.pool)
                .await?)
        })
        .await
    }

    /// Decrypt `config`'s SMTP account credential, if one is set.
    /// Populates `memo` so a following `upsert` of the same credential is a
    /// no-op re-encryption.
    pub async fn decrypt_smtp_account(
        &self,
        config: &EmailConfig,
        cipher: &ColumnCipher,
        key_id: &str,
        memo: &mut EncryptionMemo,
    ) -> DbResult<Option<String>> {
        let Some(ciphertext_b64) = &config.smtp_account_ciphertext else { return Ok(None) };
        let ciphertext = STANDARD
            .decode(ciphertext_b64)
            .map_err(|e| DbError::Generic(format!("stored SMTP account ciphertext was not base64: {e}")))?;
        let plaintext = cipher.decrypt(key_id, COLUMN, &ciphertext, memo).await?;
        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|e| DbError::Generic(format!("decrypted SMTP account was not utf8: {e}")))
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
        assert_send_sync::<EmailConfigRepository>();
    }

    #[tokio::test]
    async fn encrypted_credential_is_never_the_plaintext_on_the_wire() {
        let cipher = ColumnCipher::new(Arc::new(InMemoryKeyManager::new()), TABLE);
        let mut memo = EncryptionMemo::new();
        let ciphertext = cipher.encrypt("k1", COLUMN, b"smtp-user:smtp-pass", &mut memo).await.unwrap();
        assert_ne!(ciphertext, b"smtp-user:smtp-pass");

        let mut decrypt_memo = EncryptionMemo::new();
        let plaintext = cipher.decrypt("k1", COLUMN, &ciphertext, &mut decrypt_memo).await.unwrap();
        assert_eq!(plaintext, b"smtp-user:smtp-pass");
    }
}
