//! Gmail API gateway implementation.
//!
//! This module provides a [`MailboxGateway`] implementation using the Gmail
//! REST API:
//! - `users.getProfile` for bootstrap (profile + initial history id)
//! - `users.history.list` filtered to `messageAdded` for incremental sync
//! - `users.messages.get` for full message content
//! - `users.messages.modify` / `users.messages.trash` for mutations
//!
//! # Authentication
//!
//! Every account-scoped call goes through an explicit refresh-and-retry
//! wrapper: attempt with the stored access token, and if the provider
//! rejects it, exchange the refresh token at the OAuth token endpoint,
//! persist the rotated pair through the credential store, and retry the
//! original call exactly once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::traits::{
    ChangeBatch, GatewayError, MailboxGateway, MailboxProfile, MessageContent, Result,
};
use crate::domain::{AccountKey, HistoryCursor, ProviderMessageId};
use crate::services::credential_service::CredentialStore;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth client configuration for the Google token endpoint.
#[derive(Debug, Clone)]
pub struct OauthConfig {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

/// History id as Gmail serializes it: a string in most responses, a bare
/// number in some.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireHistoryId {
    Text(String),
    Number(u64),
}

impl WireHistoryId {
    fn into_cursor(self) -> HistoryCursor {
        match self {
            WireHistoryId::Text(s) => HistoryCursor(s),
            WireHistoryId::Number(n) => HistoryCursor(n.to_string()),
        }
    }
}

/// Gmail profile response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    email_address: String,
    history_id: Option<WireHistoryId>,
}

/// Gmail history list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryListResponse {
    history: Option<Vec<GmailHistory>>,
    history_id: Option<WireHistoryId>,
}

/// Gmail history record. Only `messagesAdded` is requested; other change
/// types are out of scope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailHistory {
    messages_added: Option<Vec<GmailHistoryMessage>>,
}

/// Gmail history message wrapper.
#[derive(Debug, Deserialize)]
struct GmailHistoryMessage {
    message: Option<GmailHistoryMessageRef>,
}

/// Gmail history message reference.
#[derive(Debug, Deserialize)]
struct GmailHistoryMessageRef {
    id: String,
}

/// Gmail API message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    thread_id: Option<String>,
    snippet: Option<String>,
    payload: Option<GmailPayload>,
}

/// Gmail message payload (headers and body parts).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPayload {
    headers: Option<Vec<GmailHeader>>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

/// Gmail message header.
#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

/// Gmail message body.
#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

/// Gmail message part (for multipart messages).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    mime_type: Option<String>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

/// Gmail modify request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remove_label_ids: Vec<String>,
}

/// OAuth token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

/// Gmail API gateway.
///
/// Holds no per-account state; the account key passed to each call selects
/// credentials from the [`CredentialStore`].
pub struct GmailGateway {
    client: reqwest::Client,
    credentials: Arc<CredentialStore>,
    oauth: OauthConfig,
}

impl GmailGateway {
    /// Creates a gateway with a bounded per-request timeout.
    pub fn new(oauth: OauthConfig, credentials: Arc<CredentialStore>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            credentials,
            oauth,
        }
    }

    /// Attempts the call with the stored access token, refreshing and
    /// persisting a rotated pair on rejection, then retrying exactly once.
    async fn with_refresh<T, F, Fut>(&self, account: &AccountKey, call: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let credentials = self.credentials.get(account).await?;

        match call(credentials.access_token.clone()).await {
            Err(GatewayError::TokenExpired) => {
                tracing::debug!(account = %account, "access token rejected, refreshing");
                let access_token = self
                    .refresh_and_persist(account, credentials.refresh_token.as_deref())
                    .await?;

                call(access_token).await.map_err(|e| match e {
                    GatewayError::TokenExpired => GatewayError::ReauthorizationRequired(
                        "access token rejected immediately after refresh".to_string(),
                    ),
                    other => other,
                })
            }
            other => other,
        }
    }

    /// Exchanges the refresh token for a new access token and persists the
    /// rotated pair before returning it.
    async fn refresh_and_persist(
        &self,
        account: &AccountKey,
        refresh_token: Option<&str>,
    ) -> Result<String> {
        let refresh_token = refresh_token.ok_or_else(|| {
            GatewayError::ReauthorizationRequired("no refresh token on file".to_string())
        })?;

        let params = [
            ("client_id", self.oauth.client_id.as_str()),
            ("client_secret", self.oauth.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(GatewayError::Transient(format!(
                    "token endpoint returned {status}: {body}"
                )));
            }
            // 400/401 from the token endpoint means the grant is gone.
            return Err(GatewayError::ReauthorizationRequired(format!(
                "token refresh failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Internal(format!("parse token response: {e}")))?;

        self.credentials
            .rotate(account, &token.access_token, token.refresh_token.as_deref())
            .await?;
        tracing::info!(account = %account, "rotated access token");

        Ok(token.access_token)
    }

    /// Makes an authenticated GET request to the Gmail API.
    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, token: &str) -> Result<T> {
        let url = format!("{GMAIL_API_BASE}{endpoint}");
        let response = self
            .client
            .get(&url)
            .headers(auth_headers(token)?)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Internal(format!("parse response: {e}")))
    }

    /// Makes an authenticated POST request, discarding the response body.
    async fn post_json<B: Serialize>(&self, endpoint: &str, token: &str, body: &B) -> Result<()> {
        let url = format!("{GMAIL_API_BASE}{endpoint}");
        let response = self
            .client
            .post(&url)
            .headers(auth_headers(token)?)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }
        Ok(())
    }

    /// Makes an authenticated POST request with an empty body.
    async fn post_empty(&self, endpoint: &str, token: &str) -> Result<()> {
        let url = format!("{GMAIL_API_BASE}{endpoint}");
        let response = self
            .client
            .post(&url)
            .headers(auth_headers(token)?)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl MailboxGateway for GmailGateway {
    async fn bootstrap(&self, access_token: &str) -> Result<MailboxProfile> {
        let profile: ProfileResponse =
            self.get_json("/profile", access_token)
                .await
                .map_err(|e| match e {
                    GatewayError::TokenExpired => GatewayError::ReauthorizationRequired(
                        "access token rejected during bootstrap".to_string(),
                    ),
                    other => other,
                })?;

        Ok(MailboxProfile {
            email_address: profile.email_address,
            initial_cursor: profile.history_id.map(WireHistoryId::into_cursor),
        })
    }

    async fn list_changes_since(
        &self,
        account: &AccountKey,
        cursor: &HistoryCursor,
    ) -> Result<ChangeBatch> {
        let endpoint = format!(
            "/history?startHistoryId={}&historyTypes=messageAdded",
            cursor.0
        );

        let response: HistoryListResponse = self
            .with_refresh(account, |token| {
                let endpoint = endpoint.clone();
                async move { self.get_json(&endpoint, &token).await }
            })
            .await
            .map_err(|e| match e {
                // Gmail answers 404 when the start history id is too old.
                GatewayError::MessageNotFound(_) => GatewayError::CursorExpired,
                other => other,
            })?;

        let added = added_message_ids(&response);
        let new_cursor = response
            .history_id
            .map(WireHistoryId::into_cursor)
            .unwrap_or_else(|| cursor.clone());

        Ok(ChangeBatch {
            added_message_ids: added,
            new_cursor,
        })
    }

    async fn fetch_message(
        &self,
        account: &AccountKey,
        message_id: &ProviderMessageId,
    ) -> Result<MessageContent> {
        let endpoint = format!("/messages/{}?format=full", message_id.0);

        let message: GmailMessage = self
            .with_refresh(account, |token| {
                let endpoint = endpoint.clone();
                async move { self.get_json(&endpoint, &token).await }
            })
            .await?;

        Ok(message_to_content(message))
    }

    async fn archive(&self, account: &AccountKey, message_id: &ProviderMessageId) -> Result<()> {
        let endpoint = format!("/messages/{}/modify", message_id.0);
        let body = ModifyRequest {
            add_label_ids: vec![],
            remove_label_ids: vec!["INBOX".to_string()],
        };

        let result = self
            .with_refresh(account, |token| {
                let endpoint = endpoint.clone();
                let body = &body;
                async move { self.post_json(&endpoint, &token, body).await }
            })
            .await;

        match result {
            // Deleted remotely: nothing left to remove from the inbox.
            Err(GatewayError::MessageNotFound(_)) => {
                tracing::debug!(account = %account, message_id = %message_id,
                    "archive target already gone");
                Ok(())
            }
            other => other,
        }
    }

    async fn trash(&self, account: &AccountKey, message_id: &ProviderMessageId) -> Result<()> {
        let endpoint = format!("/messages/{}/trash", message_id.0);

        self.with_refresh(account, |token| {
            let endpoint = endpoint.clone();
            async move { self.post_empty(&endpoint, &token).await }
        })
        .await
    }
}

/// Builds bearer-token authorization headers.
fn auth_headers(token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| GatewayError::Internal(format!("invalid header: {e}")))?,
    );
    Ok(headers)
}

/// Maps transport-level failures into the gateway taxonomy.
fn map_reqwest_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() || e.is_connect() {
        GatewayError::Transient(e.to_string())
    } else {
        GatewayError::Internal(e.to_string())
    }
}

/// Maps non-success HTTP responses into the gateway taxonomy.
async fn map_error_response(response: reqwest::Response) -> GatewayError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let body = response.text().await.unwrap_or_default();

    match status.as_u16() {
        401 => GatewayError::TokenExpired,
        404 => GatewayError::MessageNotFound(body),
        429 => GatewayError::RateLimited {
            retry_after_secs: retry_after,
        },
        s if status.is_server_error() => {
            GatewayError::Transient(format!("API error ({s}): {body}"))
        }
        s => GatewayError::Internal(format!("API error ({s}): {body}")),
    }
}

/// Collects ids of added messages from a history response.
fn added_message_ids(response: &HistoryListResponse) -> Vec<ProviderMessageId> {
    let mut ids = Vec::new();
    if let Some(history) = &response.history {
        for record in history {
            if let Some(added) = &record.messages_added {
                for item in added {
                    if let Some(message) = &item.message {
                        ids.push(ProviderMessageId(message.id.clone()));
                    }
                }
            }
        }
    }
    ids
}

/// Finds a header value by case-insensitive name.
fn header_value(headers: Option<&Vec<GmailHeader>>, name: &str) -> String {
    headers
        .and_then(|h| {
            h.iter()
                .find(|hdr| hdr.name.eq_ignore_ascii_case(name))
                .map(|hdr| hdr.value.clone())
        })
        .unwrap_or_default()
}

/// Decodes a base64url-encoded body chunk.
fn decode_body_data(data: &str) -> Option<String> {
    let bytes = BASE64_URL_SAFE_NO_PAD.decode(data).ok()?;
    String::from_utf8(bytes).ok()
}

/// Extracts the plain-text body from a message payload.
///
/// Prefers the top-level body; when that is empty (multipart messages),
/// falls back to the first `text/plain` part, recursively.
fn extract_body_text(payload: &GmailPayload) -> String {
    if let Some(text) = payload
        .body
        .as_ref()
        .and_then(|b| b.data.as_ref())
        .and_then(|d| decode_body_data(d))
    {
        return text;
    }

    payload
        .parts
        .as_deref()
        .and_then(first_text_plain)
        .unwrap_or_default()
}

/// Recursively finds the first decodable `text/plain` part.
fn first_text_plain(parts: &[GmailPart]) -> Option<String> {
    for part in parts {
        if part.mime_type.as_deref() == Some("text/plain") {
            if let Some(text) = part
                .body
                .as_ref()
                .and_then(|b| b.data.as_ref())
                .and_then(|d| decode_body_data(d))
            {
                return Some(text);
            }
        }
        if let Some(nested) = &part.parts {
            if let Some(text) = first_text_plain(nested) {
                return Some(text);
            }
        }
    }
    None
}

/// Converts a Gmail message into provider-neutral content.
fn message_to_content(message: GmailMessage) -> MessageContent {
    let headers = message.payload.as_ref().and_then(|p| p.headers.as_ref());

    let subject = header_value(headers, "Subject");
    let from = header_value(headers, "From");
    let to = header_value(headers, "To");

    let body_text = message
        .payload
        .as_ref()
        .map(extract_body_text)
        .unwrap_or_default();

    MessageContent {
        message_id: ProviderMessageId(message.id),
        thread_id: message.thread_id,
        subject,
        from,
        to,
        snippet: message.snippet,
        body_text,
    }
}
