//! Mailbox gateway trait definition.
//!
//! This module defines the [`MailboxGateway`] trait, the shape of the remote
//! mailbox as consumed by the sync core: bootstrap, incremental history,
//! full-message fetch, and label mutation. Implementations own transparent
//! credential refresh; callers never see an expired access token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{AccountKey, HistoryCursor, ProviderMessageId};
use crate::services::credential_service::CredentialError;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur during mailbox gateway operations.
///
/// The variants matter to callers: the poller skips an account on
/// [`ReauthorizationRequired`](GatewayError::ReauthorizationRequired), the
/// pipeline skips a job on [`MessageNotFound`](GatewayError::MessageNotFound),
/// and everything transient is left to the queue's retry policy.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure or timeout; safe to retry.
    #[error("transient I/O failure: {0}")]
    Transient(String),

    /// The provider no longer accepts the stored history cursor. The account
    /// must be re-bootstrapped; this is not auto-recovered here.
    #[error("history cursor expired; account requires re-bootstrap")]
    CursorExpired,

    /// The refresh grant was revoked or rejected. The account is flagged and
    /// skipped until its owner re-links it.
    #[error("authorization revoked, account must be re-linked: {0}")]
    ReauthorizationRequired(String),

    /// The message disappeared remotely between discovery and fetch.
    /// Treated as a skip, not a failure.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// The access token was rejected. Consumed internally by the
    /// refresh-and-retry wrapper; escapes only if refresh is impossible.
    #[error("access token rejected")]
    TokenExpired,

    /// Credential lookup or decryption failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The provider asked us to slow down.
    #[error("rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if the provider said.
        retry_after_secs: Option<u64>,
    },

    /// Anything else: malformed responses, unexpected status codes.
    #[error("gateway error: {0}")]
    Internal(String),
}

/// Profile data returned by the bootstrap call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxProfile {
    /// The mailbox's message address, e.g. `person@gmail.com`.
    pub email_address: String,
    /// Starting point for incremental sync. Linkage persists this as the
    /// account's first cursor.
    pub initial_cursor: Option<HistoryCursor>,
}

/// One page of incremental history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Ids of messages added since the given cursor. Order is not
    /// meaningful.
    pub added_message_ids: Vec<ProviderMessageId>,
    /// Cursor to store once every id above has been enqueued. Equal to the
    /// input cursor when nothing changed.
    pub new_cursor: HistoryCursor,
}

/// Full message content as fetched from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    /// Provider-assigned message id.
    pub message_id: ProviderMessageId,
    /// Provider-side conversation id, when reported.
    pub thread_id: Option<String>,
    /// Subject header value, empty when absent.
    pub subject: String,
    /// Raw From header value.
    pub from: String,
    /// Raw To header value.
    pub to: String,
    /// Provider-generated preview text.
    pub snippet: Option<String>,
    /// Decoded plain-text body; a bounded prefix is all the AI layer needs.
    pub body_text: String,
}

/// Trait for mailbox provider implementations.
///
/// All account-scoped calls transparently refresh an expired access token
/// once (persisting the rotated pair) before retrying; a second rejection
/// surfaces as [`GatewayError::ReauthorizationRequired`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailboxGateway: Send + Sync {
    /// First authenticated call after OAuth linkage, made with a plaintext
    /// token because no account row exists yet. Linkage must abort unless
    /// this succeeds.
    async fn bootstrap(&self, access_token: &str) -> Result<MailboxProfile>;

    /// Lists "message added" changes since the cursor.
    ///
    /// An empty change set is normal. Returns
    /// [`GatewayError::CursorExpired`] when the provider rejects the cursor
    /// as too old, which is distinct from transient failure.
    async fn list_changes_since(
        &self,
        account: &AccountKey,
        cursor: &HistoryCursor,
    ) -> Result<ChangeBatch>;

    /// Fetches full message content.
    ///
    /// Returns [`GatewayError::MessageNotFound`] when the message was
    /// deleted remotely between discovery and fetch.
    async fn fetch_message(
        &self,
        account: &AccountKey,
        message_id: &ProviderMessageId,
    ) -> Result<MessageContent>;

    /// Removes the message from the primary inbox view.
    ///
    /// Idempotent: archiving an already-archived or already-deleted message
    /// is a no-op success.
    async fn archive(&self, account: &AccountKey, message_id: &ProviderMessageId) -> Result<()>;

    /// Moves a message to the trash. Used by the (excluded) UI layer.
    async fn trash(&self, account: &AccountKey, message_id: &ProviderMessageId) -> Result<()>;
}
