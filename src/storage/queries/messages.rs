//! Processed-message persistence.
//!
//! The central operation is [`upsert`]: keyed on
//! (provider, external account id, provider message id), it makes redelivered
//! jobs converge on a single row instead of duplicating. Classification and
//! summary columns always reflect the latest attempt; the archived and
//! unsubscribed flags are preserved across re-processing.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{
    AccountKey, CategoryId, Classification, MessageKey, ProviderMessageId, TriagedMessage,
};
use crate::storage::database::{Database, Result};

/// Inserts or overwrites the message row for the given upsert key.
pub async fn upsert(db: &Database, message: &TriagedMessage) -> Result<()> {
    let message = message.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        let classification_json =
            serde_json::to_string(&message.classification).unwrap_or_else(|_| "{}".to_string());

        conn.execute(
            r#"
            INSERT INTO messages (
                provider, external_account_id, provider_message_id,
                thread_id, category_id, subject, from_address, to_address,
                snippet, body_text, summary, classification,
                archived, unsubscribed, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
            ON CONFLICT(provider, external_account_id, provider_message_id) DO UPDATE SET
                thread_id = excluded.thread_id,
                category_id = excluded.category_id,
                subject = excluded.subject,
                from_address = excluded.from_address,
                to_address = excluded.to_address,
                snippet = excluded.snippet,
                body_text = excluded.body_text,
                summary = excluded.summary,
                classification = excluded.classification,
                updated_at = excluded.updated_at
            "#,
            params![
                message.key.account.provider,
                message.key.account.external_account_id,
                message.key.message_id.0,
                message.thread_id,
                message.classification.category_id.as_ref().map(|c| &c.0),
                message.subject,
                message.from,
                message.to,
                message.snippet,
                message.body_text,
                message.summary,
                classification_json,
                message.archived as i32,
                message.unsubscribed as i32,
                now,
            ],
        )?;
        Ok(())
    })
    .await
}

/// Retrieves a message by its upsert key.
pub async fn get(db: &Database, key: &MessageKey) -> Result<Option<TriagedMessage>> {
    let key = key.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT provider, external_account_id, provider_message_id,
                   thread_id, category_id, subject, from_address, to_address,
                   snippet, body_text, summary, classification,
                   archived, unsubscribed
            FROM messages
            WHERE provider = ?1 AND external_account_id = ?2 AND provider_message_id = ?3
            "#,
        )?;

        let result = stmt
            .query_row(
                [
                    &key.account.provider,
                    &key.account.external_account_id,
                    &key.message_id.0,
                ],
                row_to_message,
            )
            .optional()?;
        Ok(result)
    })
    .await
}

/// Records the outcome of the remote archive mutation.
pub async fn mark_archived(db: &Database, key: &MessageKey, archived: bool) -> Result<()> {
    set_flag(db, key, "archived", archived).await
}

/// Records the outcome of the unsubscribe pipeline.
pub async fn mark_unsubscribed(db: &Database, key: &MessageKey, unsubscribed: bool) -> Result<()> {
    set_flag(db, key, "unsubscribed", unsubscribed).await
}

async fn set_flag(db: &Database, key: &MessageKey, column: &'static str, value: bool) -> Result<()> {
    let key = key.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            &format!(
                "UPDATE messages SET {column} = ?1, updated_at = ?2
                 WHERE provider = ?3 AND external_account_id = ?4 AND provider_message_id = ?5"
            ),
            params![
                value as i32,
                now,
                key.account.provider,
                key.account.external_account_id,
                key.message_id.0
            ],
        )?;
        Ok(())
    })
    .await
}

/// Counts processed messages for an account.
pub async fn count_for_account(db: &Database, key: &AccountKey) -> Result<u32> {
    let key = key.clone();

    db.with_conn(move |conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE provider = ?1 AND external_account_id = ?2",
            [&key.provider, &key.external_account_id],
            |row| row.get(0),
        )?;
        Ok(count)
    })
    .await
}

fn row_to_message(row: &Row<'_>) -> std::result::Result<TriagedMessage, rusqlite::Error> {
    let category_column: Option<String> = row.get(4)?;
    let classification_json: String = row.get(11)?;

    let mut classification: Classification = serde_json::from_str(&classification_json)
        .unwrap_or_else(|_| Classification::degraded("unreadable stored classification"));
    // The column is authoritative: category deletion nulls it out while the
    // stored JSON keeps the historical model output.
    classification.category_id = category_column.map(CategoryId);

    Ok(TriagedMessage {
        key: MessageKey {
            account: AccountKey {
                provider: row.get(0)?,
                external_account_id: row.get(1)?,
            },
            message_id: ProviderMessageId(row.get(2)?),
        },
        thread_id: row.get(3)?,
        subject: row.get(5)?,
        from: row.get(6)?,
        to: row.get(7)?,
        snippet: row.get(8)?,
        body_text: row.get(9)?,
        summary: row.get(10)?,
        classification,
        archived: row.get::<_, i32>(12)? != 0,
        unsubscribed: row.get::<_, i32>(13)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LinkedAccount, UserId};
    use crate::storage::queries::{accounts, categories};
    use pretty_assertions::assert_eq;

    async fn seed_account(db: &Database, id: &str) -> AccountKey {
        let key = AccountKey::google(id);
        accounts::insert(
            db,
            &LinkedAccount {
                key: key.clone(),
                user_id: UserId::from("user-1"),
                email_address: format!("{id}@example.com"),
                access_token: "ct".to_string(),
                refresh_token: None,
                history_cursor: Some("1".into()),
                last_polled_at: None,
                needs_reauth: false,
            },
        )
        .await
        .unwrap();
        key
    }

    fn make_message(account: &AccountKey, id: &str, summary: &str) -> TriagedMessage {
        TriagedMessage {
            key: MessageKey::new(account.clone(), ProviderMessageId::from(id)),
            thread_id: Some("t1".to_string()),
            subject: "Your order shipped".to_string(),
            from: "shop@example.com".to_string(),
            to: "person@example.com".to_string(),
            snippet: Some("Your order is on the way".to_string()),
            body_text: "Tracking number inside".to_string(),
            summary: summary.to_string(),
            classification: Classification {
                category_id: None,
                confidence: 0.9,
                reason: "shipping notification".to_string(),
            },
            archived: false,
            unsubscribed: false,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let db = Database::open_in_memory().await.unwrap();
        let account = seed_account(&db, "a1").await;
        let message = make_message(&account, "m1", "first summary");

        upsert(&db, &message).await.unwrap();

        let stored = get(&db, &message.key).await.unwrap().unwrap();
        assert_eq!(stored.subject, "Your order shipped");
        assert_eq!(stored.summary, "first summary");
        assert_eq!(stored.classification.confidence, 0.9);
        assert!(!stored.archived);
    }

    #[tokio::test]
    async fn upsert_same_key_twice_keeps_one_row_with_latest_values() {
        let db = Database::open_in_memory().await.unwrap();
        let account = seed_account(&db, "a1").await;

        upsert(&db, &make_message(&account, "m1", "first summary"))
            .await
            .unwrap();
        upsert(&db, &make_message(&account, "m1", "second summary"))
            .await
            .unwrap();

        assert_eq!(count_for_account(&db, &account).await.unwrap(), 1);
        let stored = get(
            &db,
            &MessageKey::new(account, ProviderMessageId::from("m1")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(stored.summary, "second summary");
    }

    #[tokio::test]
    async fn upsert_does_not_reset_archived_flag() {
        let db = Database::open_in_memory().await.unwrap();
        let account = seed_account(&db, "a1").await;
        let message = make_message(&account, "m1", "summary");

        upsert(&db, &message).await.unwrap();
        mark_archived(&db, &message.key, true).await.unwrap();

        // Redelivered job writes again with archived = false in the struct.
        upsert(&db, &message).await.unwrap();

        let stored = get(&db, &message.key).await.unwrap().unwrap();
        assert!(stored.archived);
    }

    #[tokio::test]
    async fn category_deletion_nulls_reference_without_deleting_message() {
        let db = Database::open_in_memory().await.unwrap();
        let account = seed_account(&db, "a1").await;

        let category = crate::domain::Category {
            id: CategoryId::from("cat-1"),
            user_id: UserId::from("user-1"),
            name: "Shopping".to_string(),
            description: String::new(),
        };
        categories::insert(&db, &category).await.unwrap();

        let mut message = make_message(&account, "m1", "summary");
        message.classification.category_id = Some(CategoryId::from("cat-1"));
        upsert(&db, &message).await.unwrap();

        categories::delete(&db, &CategoryId::from("cat-1"))
            .await
            .unwrap();

        let stored = get(&db, &message.key).await.unwrap().unwrap();
        assert!(stored.classification.category_id.is_none());
        assert_eq!(stored.summary, "summary");
    }

    #[tokio::test]
    async fn distinct_message_ids_create_distinct_rows() {
        let db = Database::open_in_memory().await.unwrap();
        let account = seed_account(&db, "a1").await;

        upsert(&db, &make_message(&account, "m1", "s1")).await.unwrap();
        upsert(&db, &make_message(&account, "m2", "s2")).await.unwrap();

        assert_eq!(count_for_account(&db, &account).await.unwrap(), 2);
    }
}
