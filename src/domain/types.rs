//! Core identifier types for domain entities.
//!
//! These newtype wrappers provide type safety for entity identifiers,
//! preventing accidental mixing of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an application user.
///
/// User rows are owned by the (external) authentication layer; the sync core
/// only stores user ids as opaque ownership markers on accounts, categories
/// and messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Unique identifier for a user-defined triage category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryId(pub String);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CategoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CategoryId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier assigned to a message by the mailbox provider.
///
/// Opaque to this service; only ever echoed back to the provider's API or
/// used as part of the message upsert key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderMessageId(pub String);

impl fmt::Display for ProviderMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProviderMessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProviderMessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Composite key identifying one linked mailbox: the provider name plus the
/// provider-assigned account id.
///
/// This is the primary key of the accounts table and the prefix of the
/// message upsert key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    /// Provider discriminator, e.g. `"google"`.
    pub provider: String,
    /// Account id issued by the provider during OAuth linkage.
    pub external_account_id: String,
}

impl AccountKey {
    /// Creates a key from a provider name and external account id.
    pub fn new(provider: impl Into<String>, external_account_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            external_account_id: external_account_id.into(),
        }
    }

    /// Convenience constructor for Google-linked accounts.
    pub fn google(external_account_id: impl Into<String>) -> Self {
        Self::new("google", external_account_id)
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.external_account_id)
    }
}

/// Opaque, provider-issued marker of "changes seen up to this point".
///
/// Advances monotonically per account; the provider may invalidate it
/// independently of time, which forces a re-bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryCursor(pub String);

impl fmt::Display for HistoryCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HistoryCursor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HistoryCursor {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_key_display() {
        let key = AccountKey::google("112233");
        assert_eq!(key.to_string(), "google:112233");
    }

    #[test]
    fn account_key_equality() {
        assert_eq!(AccountKey::google("a"), AccountKey::new("google", "a"));
        assert_ne!(AccountKey::google("a"), AccountKey::google("b"));
        assert_ne!(AccountKey::google("a"), AccountKey::new("outlook", "a"));
    }

    #[test]
    fn cursor_from_str() {
        let cursor = HistoryCursor::from("100");
        assert_eq!(cursor.0, "100");
        assert_eq!(cursor.to_string(), "100");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ProviderMessageId::from("m1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"m1\"");

        let user: UserId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(user.0, "u1");
    }
}
