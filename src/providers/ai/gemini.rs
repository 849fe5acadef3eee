//! Google Gemini API client implementation.
//!
//! Uses the `generateContent` REST endpoint. Classification output is
//! validated against a strict schema; anything that fails validation
//! becomes a typed degraded outcome rather than an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::traits::{
    AiClient, AiError, ClassifyOutcome, ClassifyRequest, Result, SummarizeRequest,
};
use crate::domain::{CategoryId, Classification};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Body prefix sent with classification prompts. Keeps token cost bounded;
/// headers carry most of the signal anyway.
const CLASSIFY_BODY_LIMIT: usize = 1000;

/// Body prefix sent with summarization prompts.
const SUMMARIZE_BODY_LIMIT: usize = 2000;

/// Gemini generateContent request.
#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<WireContent>,
}

#[derive(Debug, Serialize)]
struct WireContent {
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
struct WirePart {
    text: String,
}

/// Gemini generateContent response.
#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// The exact shape the classification prompt asks the model to return.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassificationPayload {
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    reason: Option<String>,
}

impl ClassificationPayload {
    fn into_classification(self) -> Classification {
        let category_id = self
            .category_id
            .filter(|id| !id.trim().is_empty())
            .map(CategoryId);

        Classification {
            category_id,
            confidence: self.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            reason: self
                .reason
                .unwrap_or_else(|| "no reason provided".to_string()),
        }
    }
}

/// Client for Google's Gemini API.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    /// Default model used when configuration does not name one.
    pub const DEFAULT_MODEL: &'static str = "gemini-2.0-flash";

    /// Creates a client with a bounded per-request timeout.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Returns the configured model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends one prompt and returns the concatenated candidate text.
    async fn generate(&self, prompt: String) -> Result<String> {
        let url = format!(
            "{GEMINI_API_BASE}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let body = GenerateContentRequest {
            contents: vec![WireContent {
                parts: vec![WirePart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(format!("parse response: {e}")))?;

        let text = candidate_text(&parsed);
        if text.is_empty() {
            return Err(AiError::InvalidResponse(
                "response contained no candidate text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl AiClient for GeminiClient {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifyOutcome> {
        if request.categories.is_empty() {
            // Nothing to classify into; skip the round trip.
            return Ok(ClassifyOutcome::Degraded {
                reason: "no categories defined".to_string(),
            });
        }

        let prompt = classification_prompt(request);
        let response = self.generate(prompt).await?;

        let outcome = parse_classification(&response);
        if let ClassifyOutcome::Degraded { reason } = &outcome {
            tracing::warn!(reason = %reason, "classification output rejected");
        }
        Ok(outcome)
    }

    async fn summarize(&self, request: &SummarizeRequest) -> Result<String> {
        let prompt = summary_prompt(request);
        let summary = self.generate(prompt).await?;
        Ok(summary.trim().to_string())
    }
}

/// Concatenates text parts of the first candidate.
fn candidate_text(response: &GenerateContentResponse) -> String {
    response
        .candidates
        .as_deref()
        .and_then(|c| c.first())
        .and_then(|c| c.content.as_ref())
        .and_then(|c| c.parts.as_ref())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Truncates to a character-bounded prefix, respecting char boundaries.
fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Builds the classification prompt.
fn classification_prompt(request: &ClassifyRequest) -> String {
    let categories_text = request
        .categories
        .iter()
        .map(|cat| format!("- {} (ID: {}): {}", cat.name, cat.id, cat.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an email classification assistant. Classify the following email into one of the provided categories.

Email:
Subject: {subject}
From: {from}
Body: {body}

Categories:
{categories_text}

Return your response as valid JSON with this structure:
{{
  "categoryId": "the category ID that best matches, or null if no good match",
  "confidence": 0.0-1.0,
  "reason": "brief explanation of why this category was chosen"
}}"#,
        subject = request.subject,
        from = request.from,
        body = truncate_chars(&request.body, CLASSIFY_BODY_LIMIT),
    )
}

/// Builds the summarization prompt.
fn summary_prompt(request: &SummarizeRequest) -> String {
    format!(
        r#"Summarize the following email in 2-3 sentences (40-80 words). Include the sender, main purpose, and any call-to-action.

Email:
Subject: {subject}
From: {from}
Body: {body}

Return only the summary text, no additional formatting."#,
        subject = request.subject,
        from = request.from,
        body = truncate_chars(&request.body, SUMMARIZE_BODY_LIMIT),
    )
}

/// Removes a surrounding markdown code fence, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json") up to the first newline, then the
    // closing fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.rsplit_once("```")
        .map(|(body, _)| body)
        .unwrap_or(rest)
        .trim()
}

/// Validates model output against the classification schema.
///
/// This is a strict parse of the whole (fence-stripped) response, not a
/// scan for a JSON-looking substring; output that does not validate becomes
/// the typed degraded outcome.
fn parse_classification(raw: &str) -> ClassifyOutcome {
    let candidate = strip_code_fence(raw);

    match serde_json::from_str::<ClassificationPayload>(candidate) {
        Ok(payload) => ClassifyOutcome::Parsed(payload.into_classification()),
        Err(e) => {
            tracing::debug!(error = %e, "classification response failed schema validation");
            ClassifyOutcome::Degraded {
                reason: "classification failed".to_string(),
            }
        }
    }
}
