//! Account linkage and disconnect.
//!
//! Linkage ordering matters: the bootstrap profile fetch runs with the
//! plaintext token pair *before* anything is persisted, so a token pair
//! that the provider rejects is never written to disk. The profile's
//! history id becomes the account's first cursor, making it immediately
//! eligible for polling.

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{AccountKey, LinkedAccount, UserId};
use crate::providers::email::{GatewayError, MailboxGateway};
use crate::services::credential_service::{CredentialError, CredentialStore};
use crate::storage::database::{Database, DatabaseError};
use crate::storage::queries::accounts;

/// Errors that can occur during account linkage or disconnect.
#[derive(Debug, Error)]
pub enum AccountError {
    /// The provider rejected the linkage call; nothing was persisted.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Manages the lifecycle of linked mailbox accounts.
pub struct AccountService {
    db: Database,
    gateway: Arc<dyn MailboxGateway>,
    credentials: Arc<CredentialStore>,
}

impl AccountService {
    /// Creates an account service.
    pub fn new(
        db: Database,
        gateway: Arc<dyn MailboxGateway>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            db,
            gateway,
            credentials,
        }
    }

    /// Links a mailbox after OAuth: proves the token pair against the live
    /// API, then persists the account with encrypted tokens and the
    /// bootstrap cursor.
    pub async fn link(
        &self,
        user_id: &UserId,
        key: &AccountKey,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<LinkedAccount, AccountError> {
        let profile = self.gateway.bootstrap(access_token).await?;

        let account = LinkedAccount {
            key: key.clone(),
            user_id: user_id.clone(),
            email_address: profile.email_address,
            access_token: self.credentials.seal(access_token)?,
            refresh_token: refresh_token
                .map(|t| self.credentials.seal(t))
                .transpose()?,
            history_cursor: profile.initial_cursor,
            last_polled_at: None,
            needs_reauth: false,
        };

        accounts::insert(&self.db, &account).await?;

        tracing::info!(account = %key, mailbox = %account.email_address,
            "mailbox linked");
        Ok(account)
    }

    /// Disconnects an account, deleting it and its processed messages.
    ///
    /// Rejecting deletion of a user's last account is the caller's policy;
    /// this core treats zero remaining accounts as a valid state.
    pub async fn disconnect(&self, key: &AccountKey) -> Result<(), AccountError> {
        accounts::delete(&self.db, key).await?;
        tracing::info!(account = %key, "mailbox disconnected");
        Ok(())
    }
}
