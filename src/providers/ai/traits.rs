//! AI backend trait definition.
//!
//! The triage pipeline needs exactly two capabilities from the model:
//! classify a message against the user's categories, and summarize it.
//! Classification is best-effort: malformed model output degrades to a
//! typed fallback instead of failing the job. A summarization failure is
//! job-fatal and handed to the queue's retry policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Category, Classification};

/// Result type alias for AI operations.
pub type Result<T> = std::result::Result<T, AiError>;

/// Errors from the AI backend. These are transport/API-level failures;
/// unparseable model output is not an error but a degraded outcome.
#[derive(Debug, Error)]
pub enum AiError {
    /// Network failure or timeout.
    #[error("AI transport error: {0}")]
    Transport(String),

    /// Non-success response from the API.
    #[error("AI API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error body or description.
        message: String,
    },

    /// The response arrived but was structurally unusable.
    #[error("invalid AI response: {0}")]
    InvalidResponse(String),
}

/// Input for a classification call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    /// Message subject.
    pub subject: String,
    /// Raw From header value.
    pub from: String,
    /// Plain-text body; implementations truncate to a bounded prefix.
    pub body: String,
    /// The user's category set. May be empty, in which case the outcome is
    /// always degraded.
    pub categories: Vec<Category>,
}

/// Input for a summarization call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeRequest {
    /// Message subject.
    pub subject: String,
    /// Raw From header value.
    pub from: String,
    /// Plain-text body; implementations truncate to a bounded prefix.
    pub body: String,
}

/// Typed outcome of a classification call.
///
/// The degraded path is part of the contract, not an error: the pipeline
/// records it and continues.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyOutcome {
    /// The model returned a schema-valid classification.
    Parsed(Classification),
    /// The model's output could not be validated against the schema.
    Degraded {
        /// Why the output was rejected.
        reason: String,
    },
}

impl ClassifyOutcome {
    /// Collapses the outcome into the classification to persist.
    pub fn into_classification(self) -> Classification {
        match self {
            ClassifyOutcome::Parsed(classification) => classification,
            ClassifyOutcome::Degraded { reason } => Classification::degraded(reason),
        }
    }

    /// Whether this outcome is the degraded fallback.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ClassifyOutcome::Degraded { .. })
    }
}

/// Trait for AI backend implementations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Classifies a message into one of the user's categories.
    ///
    /// Returns `Err` only for transport/API failures; model output that
    /// fails schema validation yields `Ok(ClassifyOutcome::Degraded)`.
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifyOutcome>;

    /// Summarizes a message in a few sentences.
    async fn summarize(&self, request: &SummarizeRequest) -> Result<String>;
}
