//! Triaged message domain types.

use serde::{Deserialize, Serialize};

use super::{AccountKey, CategoryId, ProviderMessageId};

/// Upsert key for a processed message: the owning account plus the
/// provider-assigned message id.
///
/// Re-processing the same key must overwrite, never duplicate; this is what
/// makes at-least-once job delivery safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    /// The mailbox this message belongs to.
    pub account: AccountKey,
    /// Provider-assigned message id.
    pub message_id: ProviderMessageId,
}

impl MessageKey {
    /// Creates a message key.
    pub fn new(account: AccountKey, message_id: ProviderMessageId) -> Self {
        Self {
            account,
            message_id,
        }
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.account, self.message_id)
    }
}

/// Result of the AI classification step, stored alongside the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Matched category, if the model found a good fit.
    pub category_id: Option<CategoryId>,
    /// Model confidence in [0, 1].
    pub confidence: f32,
    /// Brief model-provided rationale.
    pub reason: String,
}

impl Classification {
    /// The fallback recorded when classification could not produce a usable
    /// result. Not an error: the pipeline continues with no category.
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            category_id: None,
            confidence: 0.0,
            reason: reason.into(),
        }
    }
}

/// One normalized processed email, as persisted by the triage pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriagedMessage {
    /// Unique upsert key.
    pub key: MessageKey,
    /// Provider-side conversation id, when reported.
    pub thread_id: Option<String>,
    /// Subject header value.
    pub subject: String,
    /// Raw From header value.
    pub from: String,
    /// Raw To header value.
    pub to: String,
    /// Provider-generated preview text.
    pub snippet: Option<String>,
    /// Decoded plain-text body.
    pub body_text: String,
    /// AI-generated summary.
    pub summary: String,
    /// AI classification outcome (possibly degraded).
    pub classification: Classification,
    /// Whether the remote archive mutation has completed.
    pub archived: bool,
    /// Whether the unsubscribe pipeline has run for this message.
    pub unsubscribed: bool,
}
