//! Linked-account CRUD operations.
//!
//! Provides database operations for account rows, including the two hot
//! paths of the sync core: cursor advancement and token rotation. Both are
//! single-row, single-statement updates so they stay safe under concurrent
//! pollers and workers.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{AccountKey, HistoryCursor, LinkedAccount, UserId};
use crate::storage::database::{Database, Result};

/// Inserts a new linked account.
pub async fn insert(db: &Database, account: &LinkedAccount) -> Result<()> {
    let account = account.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO accounts (
                provider, external_account_id, user_id, email_address,
                access_token, refresh_token, history_cursor, last_polled_at,
                needs_reauth, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                account.key.provider,
                account.key.external_account_id,
                account.user_id.0,
                account.email_address,
                account.access_token,
                account.refresh_token,
                account.history_cursor.as_ref().map(|c| &c.0),
                account.last_polled_at.map(|t| t.to_rfc3339()),
                account.needs_reauth as i32,
                now,
                now,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves an account by its composite key.
pub async fn get(db: &Database, key: &AccountKey) -> Result<Option<LinkedAccount>> {
    let key = key.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!("{SELECT_ACCOUNT} WHERE provider = ?1 AND external_account_id = ?2"))?;
        let result = stmt
            .query_row([&key.provider, &key.external_account_id], row_to_account)
            .optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves all accounts eligible for polling: a non-null cursor and a
/// grant that has not been revoked.
pub async fn eligible(db: &Database) -> Result<Vec<LinkedAccount>> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "{SELECT_ACCOUNT} WHERE history_cursor IS NOT NULL AND needs_reauth = 0
             ORDER BY provider, external_account_id"
        ))?;
        let rows = stmt.query_map([], row_to_account)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Retrieves one user's eligible accounts.
pub async fn eligible_for_user(db: &Database, user_id: &UserId) -> Result<Vec<LinkedAccount>> {
    let user_id = user_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "{SELECT_ACCOUNT} WHERE user_id = ?1 AND history_cursor IS NOT NULL AND needs_reauth = 0
             ORDER BY provider, external_account_id"
        ))?;
        let rows = stmt.query_map([&user_id.0], row_to_account)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    })
    .await
}

/// Advances the account's history cursor and stamps the poll time.
///
/// Called only after every message id in the polled batch has been
/// enqueued, so the cursor can never skip past undiscovered work.
pub async fn advance_cursor(db: &Database, key: &AccountKey, cursor: &HistoryCursor) -> Result<()> {
    let key = key.clone();
    let cursor = cursor.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE accounts
             SET history_cursor = ?1, last_polled_at = ?2, updated_at = ?2
             WHERE provider = ?3 AND external_account_id = ?4",
            params![cursor.0, now, key.provider, key.external_account_id],
        )?;
        Ok(())
    })
    .await
}

/// Flags or clears the needs-reauthorization marker.
pub async fn set_needs_reauth(db: &Database, key: &AccountKey, needs_reauth: bool) -> Result<()> {
    let key = key.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE accounts SET needs_reauth = ?1, updated_at = ?2
             WHERE provider = ?3 AND external_account_id = ?4",
            params![
                needs_reauth as i32,
                now,
                key.provider,
                key.external_account_id
            ],
        )?;
        Ok(())
    })
    .await
}

/// Replaces the stored token ciphertexts.
///
/// When `refresh_token` is `None` the previously stored refresh token is
/// preserved; a rotation must never erase a still-valid refresh grant.
/// Returns whether an account row was updated.
pub async fn rotate_tokens(
    db: &Database,
    key: &AccountKey,
    access_token: &str,
    refresh_token: Option<&str>,
) -> Result<bool> {
    let key = key.clone();
    let access_token = access_token.to_string();
    let refresh_token = refresh_token.map(|t| t.to_string());

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE accounts
             SET access_token = ?1,
                 refresh_token = COALESCE(?2, refresh_token),
                 updated_at = ?3
             WHERE provider = ?4 AND external_account_id = ?5",
            params![
                access_token,
                refresh_token,
                now,
                key.provider,
                key.external_account_id
            ],
        )?;
        Ok(changed > 0)
    })
    .await
}

/// Reads the stored token ciphertexts for an account.
pub async fn token_ciphertexts(
    db: &Database,
    key: &AccountKey,
) -> Result<Option<(String, Option<String>)>> {
    let key = key.clone();

    db.with_conn(move |conn| {
        let result = conn
            .query_row(
                "SELECT access_token, refresh_token FROM accounts
                 WHERE provider = ?1 AND external_account_id = ?2",
                [&key.provider, &key.external_account_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(result)
    })
    .await
}

/// Deletes an account and all of its processed messages.
pub async fn delete(db: &Database, key: &AccountKey) -> Result<()> {
    let key = key.clone();

    db.transaction(move |tx| {
        tx.execute(
            "DELETE FROM messages WHERE provider = ?1 AND external_account_id = ?2",
            [&key.provider, &key.external_account_id],
        )?;
        tx.execute(
            "DELETE FROM accounts WHERE provider = ?1 AND external_account_id = ?2",
            [&key.provider, &key.external_account_id],
        )?;
        Ok(())
    })
    .await
}

/// Counts linked accounts.
pub async fn count(db: &Database) -> Result<u32> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count)
    })
    .await
}

const SELECT_ACCOUNT: &str = r#"
    SELECT provider, external_account_id, user_id, email_address,
           access_token, refresh_token, history_cursor, last_polled_at, needs_reauth
    FROM accounts
"#;

fn row_to_account(row: &Row<'_>) -> std::result::Result<LinkedAccount, rusqlite::Error> {
    let last_polled_at: Option<String> = row.get(7)?;
    let last_polled_at = last_polled_at
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));

    Ok(LinkedAccount {
        key: AccountKey {
            provider: row.get(0)?,
            external_account_id: row.get(1)?,
        },
        user_id: UserId(row.get(2)?),
        email_address: row.get(3)?,
        access_token: row.get(4)?,
        refresh_token: row.get(5)?,
        history_cursor: row.get::<_, Option<String>>(6)?.map(HistoryCursor),
        last_polled_at,
        needs_reauth: row.get::<_, i32>(8)? != 0,
    })
}
