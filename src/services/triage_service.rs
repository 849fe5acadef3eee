//! Triage service: the per-message processing pipeline.
//!
//! For each discovered message: fetch content, classify and summarize with
//! the AI backend, persist the normalized record, then archive it in the
//! remote mailbox. The record is written before the remote mutation, so a
//! crash between the two leaves a correctly-triaged message still in the
//! inbox; the redelivered job re-archives idempotently.
//!
//! Failure semantics per step:
//! - fetch: `MessageNotFound` is a skip, everything else retries
//! - classify: transport errors retry; unparseable output degrades
//! - summarize: any failure retries (a missing summary is a real defect)
//! - archive: failure retries, but never undoes the persisted record

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AccountKey, MessageKey, ProviderMessageId, TriagedMessage, UserId};
use crate::providers::ai::{AiClient, AiError, ClassifyRequest, SummarizeRequest};
use crate::providers::email::{GatewayError, MailboxGateway};
use crate::queue::{JobHandler, JobPayload};
use crate::storage::database::{Database, DatabaseError};
use crate::storage::queries::{accounts, categories, messages};

/// Errors that can fail a triage job. All of them are handed to the queue's
/// retry policy by the worker.
#[derive(Debug, Error)]
pub enum TriageError {
    /// The job references an account that no longer exists locally.
    #[error("account {0} is not linked")]
    UnknownAccount(AccountKey),

    /// The classification backend was unreachable (distinct from degraded
    /// output, which is not an error).
    #[error("classification backend failed: {0}")]
    Classification(#[source] AiError),

    /// The summarization call failed; job-fatal by contract.
    #[error("summarization failed: {0}")]
    Summarization(#[source] AiError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Executes the per-message pipeline. Registered as the job handler for
/// both job types.
pub struct TriageService {
    db: Database,
    gateway: Arc<dyn MailboxGateway>,
    ai: Arc<dyn AiClient>,
}

impl TriageService {
    /// Creates a triage service.
    pub fn new(db: Database, gateway: Arc<dyn MailboxGateway>, ai: Arc<dyn AiClient>) -> Self {
        Self { db, gateway, ai }
    }

    /// Runs the full pipeline for one message.
    ///
    /// End-to-end idempotent: the message upsert key collapses duplicate
    /// deliveries and the remote archive is a no-op the second time.
    pub async fn process_new_message(
        &self,
        account_key: &AccountKey,
        message_id: &ProviderMessageId,
    ) -> Result<(), TriageError> {
        let content = match self.gateway.fetch_message(account_key, message_id).await {
            Ok(content) => content,
            Err(GatewayError::MessageNotFound(_)) => {
                tracing::info!(account = %account_key, message_id = %message_id,
                    "message deleted remotely before fetch, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let account = accounts::get(&self.db, account_key)
            .await?
            .ok_or_else(|| TriageError::UnknownAccount(account_key.clone()))?;

        let user_categories = categories::for_user(&self.db, &account.user_id).await?;

        let outcome = self
            .ai
            .classify(&ClassifyRequest {
                subject: content.subject.clone(),
                from: content.from.clone(),
                body: content.body_text.clone(),
                categories: user_categories,
            })
            .await
            .map_err(TriageError::Classification)?;

        if outcome.is_degraded() {
            tracing::warn!(account = %account_key, message_id = %message_id,
                "classification degraded, continuing without category");
        }

        let summary = self
            .ai
            .summarize(&SummarizeRequest {
                subject: content.subject.clone(),
                from: content.from.clone(),
                body: content.body_text.clone(),
            })
            .await
            .map_err(TriageError::Summarization)?;

        let message = TriagedMessage {
            key: MessageKey::new(account_key.clone(), message_id.clone()),
            thread_id: content.thread_id,
            subject: content.subject,
            from: content.from,
            to: content.to,
            snippet: content.snippet,
            body_text: content.body_text,
            summary,
            classification: outcome.into_classification(),
            archived: false,
            unsubscribed: false,
        };

        // Durable write first; the remote mutation below is safe to retry.
        messages::upsert(&self.db, &message).await?;

        self.gateway.archive(account_key, message_id).await?;
        messages::mark_archived(&self.db, &message.key, true).await?;

        tracing::info!(message = %message.key, "message triaged and archived");
        Ok(())
    }

    /// Unsubscribe pipeline. Accepted and routed; the automation itself is
    /// not implemented yet.
    pub async fn unsubscribe(
        &self,
        message_id: &ProviderMessageId,
        user_id: &UserId,
    ) -> Result<(), TriageError> {
        tracing::info!(message_id = %message_id, user = %user_id,
            "unsubscribe requested, pipeline not implemented yet");
        Ok(())
    }
}

#[async_trait]
impl JobHandler for TriageService {
    async fn handle(&self, payload: &JobPayload) -> anyhow::Result<()> {
        match payload {
            JobPayload::ProcessNewMessage {
                account,
                message_id,
            } => self.process_new_message(account, message_id).await?,
            JobPayload::Unsubscribe {
                message_id,
                user_id,
            } => self.unsubscribe(message_id, user_id).await?,
        }
        Ok(())
    }
}
