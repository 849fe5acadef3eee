//! Credential store: encrypted OAuth token persistence.
//!
//! Tokens live in the accounts table as AES-256-GCM ciphertext and are
//! decrypted only transiently, inside the gateway's call path. Rotation is a
//! single-row update, safe under concurrent pollers and workers touching the
//! same account (last writer wins, which is fine for provider-issued
//! tokens).

use thiserror::Error;

use crate::domain::AccountKey;
use crate::storage::crypto::{CryptoError, TokenCipher};
use crate::storage::database::{Database, DatabaseError};
use crate::storage::queries::accounts;

/// Errors that can occur during credential operations.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No account row exists for the key.
    #[error("no credentials stored for {0}")]
    NotFound(AccountKey),

    /// Sealing or opening the ciphertext failed; corrupted ciphertext is
    /// never handed out as a token.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Result type for credential operations.
pub type Result<T> = std::result::Result<T, CredentialError>;

/// A decrypted token pair, alive only for the duration of one gateway call.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// OAuth access token, plaintext.
    pub access_token: String,
    /// OAuth refresh token, plaintext, when one was issued.
    pub refresh_token: Option<String>,
}

/// Decrypt-on-read, encrypt-on-write access to stored OAuth credentials.
#[derive(Debug)]
pub struct CredentialStore {
    db: Database,
    cipher: TokenCipher,
}

impl CredentialStore {
    /// Creates a store over the given database and cipher.
    pub fn new(db: Database, cipher: TokenCipher) -> Self {
        Self { db, cipher }
    }

    /// Encrypts a single token for initial persistence at linkage time.
    pub fn seal(&self, token: &str) -> Result<String> {
        Ok(self.cipher.encrypt(token)?)
    }

    /// Reads and decrypts the token pair for an account.
    pub async fn get(&self, key: &AccountKey) -> Result<Credentials> {
        let (access_ct, refresh_ct) = accounts::token_ciphertexts(&self.db, key)
            .await?
            .ok_or_else(|| CredentialError::NotFound(key.clone()))?;

        let access_token = self.cipher.decrypt(&access_ct)?;
        let refresh_token = refresh_ct
            .map(|ct| self.cipher.decrypt(&ct))
            .transpose()?;

        Ok(Credentials {
            access_token,
            refresh_token,
        })
    }

    /// Encrypts and persists a rotated token pair.
    ///
    /// A rotation without a new refresh token keeps the stored one; a valid
    /// refresh grant is never silently erased.
    pub async fn rotate(
        &self,
        key: &AccountKey,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        let access_ct = self.cipher.encrypt(access_token)?;
        let refresh_ct = refresh_token
            .map(|t| self.cipher.encrypt(t))
            .transpose()?;

        let updated =
            accounts::rotate_tokens(&self.db, key, &access_ct, refresh_ct.as_deref()).await?;
        if !updated {
            return Err(CredentialError::NotFound(key.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LinkedAccount, UserId};
    use base64::prelude::*;

    fn test_cipher() -> TokenCipher {
        TokenCipher::new(Some(BASE64_STANDARD.encode([9u8; 32])))
    }

    async fn seed_account(db: &Database, store: &CredentialStore) -> AccountKey {
        let key = AccountKey::google("acct-1");
        accounts::insert(
            db,
            &LinkedAccount {
                key: key.clone(),
                user_id: UserId::from("user-1"),
                email_address: "person@example.com".to_string(),
                access_token: store.seal("initial-access").unwrap(),
                refresh_token: Some(store.seal("initial-refresh").unwrap()),
                history_cursor: Some("1".into()),
                last_polled_at: None,
                needs_reauth: false,
            },
        )
        .await
        .unwrap();
        key
    }

    #[tokio::test]
    async fn get_decrypts_stored_pair() {
        let db = Database::open_in_memory().await.unwrap();
        let store = CredentialStore::new(db.clone(), test_cipher());
        let key = seed_account(&db, &store).await;

        let creds = store.get(&key).await.unwrap();
        assert_eq!(creds.access_token, "initial-access");
        assert_eq!(creds.refresh_token, Some("initial-refresh".to_string()));
    }

    #[tokio::test]
    async fn get_unknown_account_is_not_found() {
        let db = Database::open_in_memory().await.unwrap();
        let store = CredentialStore::new(db, test_cipher());

        let result = store.get(&AccountKey::google("missing")).await;
        assert!(matches!(result, Err(CredentialError::NotFound(_))));
    }

    #[tokio::test]
    async fn rotate_replaces_access_and_preserves_refresh() {
        let db = Database::open_in_memory().await.unwrap();
        let store = CredentialStore::new(db.clone(), test_cipher());
        let key = seed_account(&db, &store).await;

        store.rotate(&key, "new-access", None).await.unwrap();

        let creds = store.get(&key).await.unwrap();
        assert_eq!(creds.access_token, "new-access");
        assert_eq!(creds.refresh_token, Some("initial-refresh".to_string()));
    }

    #[tokio::test]
    async fn rotate_can_replace_both_tokens() {
        let db = Database::open_in_memory().await.unwrap();
        let store = CredentialStore::new(db.clone(), test_cipher());
        let key = seed_account(&db, &store).await;

        store
            .rotate(&key, "new-access", Some("new-refresh"))
            .await
            .unwrap();

        let creds = store.get(&key).await.unwrap();
        assert_eq!(creds.refresh_token, Some("new-refresh".to_string()));
    }

    #[tokio::test]
    async fn corrupted_ciphertext_fails_closed() {
        let db = Database::open_in_memory().await.unwrap();
        let store = CredentialStore::new(db.clone(), test_cipher());
        let key = AccountKey::google("acct-1");

        accounts::insert(
            &db,
            &LinkedAccount {
                key: key.clone(),
                user_id: UserId::from("user-1"),
                email_address: "person@example.com".to_string(),
                access_token: "not-a-valid-blob".to_string(),
                refresh_token: None,
                history_cursor: None,
                last_polled_at: None,
                needs_reauth: false,
            },
        )
        .await
        .unwrap();

        let result = store.get(&key).await;
        assert!(matches!(
            result,
            Err(CredentialError::Crypto(CryptoError::DecryptionFailed))
        ));
    }

    #[tokio::test]
    async fn missing_key_surfaces_as_crypto_error() {
        let db = Database::open_in_memory().await.unwrap();
        let keyed = CredentialStore::new(db.clone(), test_cipher());
        let key = seed_account(&db, &keyed).await;

        let keyless = CredentialStore::new(db, TokenCipher::new(None));
        let result = keyless.get(&key).await;
        assert!(matches!(
            result,
            Err(CredentialError::Crypto(CryptoError::KeyMissing))
        ));
    }
}
