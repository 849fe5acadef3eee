//! Linked mailbox account domain type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountKey, HistoryCursor, UserId};

/// One OAuth-linked external mailbox.
///
/// Token fields hold ciphertext produced by the credential store; plaintext
/// tokens exist only transiently in memory inside the gateway's call path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedAccount {
    /// Composite identity: (provider, external account id).
    pub key: AccountKey,
    /// The application user who owns this mailbox.
    pub user_id: UserId,
    /// Address of the mailbox, as reported by the provider at linkage.
    pub email_address: String,
    /// Encrypted OAuth access token.
    pub access_token: String,
    /// Encrypted OAuth refresh token, when the provider issued one.
    pub refresh_token: Option<String>,
    /// Incremental-sync cursor; `None` until the first successful profile
    /// fetch. Accounts without a cursor are not eligible for polling.
    pub history_cursor: Option<HistoryCursor>,
    /// When this account was last polled. Advisory only.
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Set when the refresh grant is revoked; polling skips the account
    /// until it is re-linked.
    pub needs_reauth: bool,
}

impl LinkedAccount {
    /// Whether the poller should consider this account.
    pub fn is_eligible(&self) -> bool {
        self.history_cursor.is_some() && !self.needs_reauth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(cursor: Option<&str>, needs_reauth: bool) -> LinkedAccount {
        LinkedAccount {
            key: AccountKey::google("acct-1"),
            user_id: UserId::from("user-1"),
            email_address: "person@example.com".to_string(),
            access_token: "ciphertext-a".to_string(),
            refresh_token: Some("ciphertext-r".to_string()),
            history_cursor: cursor.map(HistoryCursor::from),
            last_polled_at: None,
            needs_reauth,
        }
    }

    #[test]
    fn eligible_requires_cursor() {
        assert!(account(Some("100"), false).is_eligible());
        assert!(!account(None, false).is_eligible());
    }

    #[test]
    fn eligible_requires_valid_grant() {
        assert!(!account(Some("100"), true).is_eligible());
    }

    #[test]
    fn account_round_trips_through_json() {
        let account = account(Some("42"), false);
        let json = serde_json::to_string(&account).unwrap();
        let back: LinkedAccount = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, account.key);
        assert_eq!(back.history_cursor, Some(HistoryCursor::from("42")));
    }
}
