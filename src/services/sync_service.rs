//! Sync service: one poll pass over eligible accounts.
//!
//! A pass asks the gateway for history since each account's stored cursor,
//! enqueues one processing job per discovered message, then advances the
//! cursor. The cursor is written only after the whole batch is enqueued, so
//! it can never skip past undiscovered work; on any failure it is left
//! unchanged and the next tick retries from the same point (duplicates are
//! absorbed by the idempotent pipeline).
//!
//! Per-account failures are isolated: one broken account never aborts the
//! pass for the others.

use std::sync::Arc;

use thiserror::Error;

use crate::domain::{AccountKey, LinkedAccount, UserId};
use crate::providers::email::{GatewayError, MailboxGateway};
use crate::queue::{JobPayload, JobQueue, QueueError, RetryPolicy};
use crate::storage::database::{Database, DatabaseError};
use crate::storage::queries::accounts;

/// Outcome of polling a single account.
#[derive(Debug, Clone)]
pub struct AccountSyncOutcome {
    /// Which account.
    pub account: AccountKey,
    /// Number of processing jobs enqueued for it.
    pub new_messages: usize,
    /// The failure, if the account's poll failed.
    pub error: Option<String>,
}

impl AccountSyncOutcome {
    /// Whether this account's poll succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one poll pass.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Total processing jobs enqueued across accounts.
    pub total_new_messages: usize,
    /// Per-account outcomes, successes and failures alike.
    pub accounts: Vec<AccountSyncOutcome>,
}

#[derive(Debug, Error)]
enum PollError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Discovers new messages for eligible accounts and feeds the job queue.
pub struct SyncService {
    db: Database,
    gateway: Arc<dyn MailboxGateway>,
    queue: JobQueue,
    retry_policy: RetryPolicy,
}

impl SyncService {
    /// Creates a sync service.
    pub fn new(
        db: Database,
        gateway: Arc<dyn MailboxGateway>,
        queue: JobQueue,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            db,
            gateway,
            queue,
            retry_policy,
        }
    }

    /// Polls every eligible account. Zero eligible accounts is a valid
    /// no-op, not an error.
    pub async fn poll_eligible_accounts(&self) -> Result<SyncReport, DatabaseError> {
        let eligible = accounts::eligible(&self.db).await?;
        tracing::debug!(accounts = eligible.len(), "starting poll pass");
        Ok(self.poll_accounts(eligible).await)
    }

    /// The manual "sync now" surface: one poll pass restricted to a user's
    /// eligible accounts, reporting per-account success or failure.
    pub async fn sync_now_for_user(&self, user_id: &UserId) -> Result<SyncReport, DatabaseError> {
        let eligible = accounts::eligible_for_user(&self.db, user_id).await?;
        tracing::info!(user = %user_id, accounts = eligible.len(), "manual sync requested");
        Ok(self.poll_accounts(eligible).await)
    }

    async fn poll_accounts(&self, accounts: Vec<LinkedAccount>) -> SyncReport {
        let mut report = SyncReport::default();

        for account in accounts {
            match self.poll_account(&account).await {
                Ok(new_messages) => {
                    report.total_new_messages += new_messages;
                    report.accounts.push(AccountSyncOutcome {
                        account: account.key,
                        new_messages,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(account = %account.key, error = %e, "account poll failed");

                    if let PollError::Gateway(GatewayError::ReauthorizationRequired(_)) = &e {
                        if let Err(flag_err) =
                            accounts::set_needs_reauth(&self.db, &account.key, true).await
                        {
                            tracing::error!(account = %account.key, error = %flag_err,
                                "failed to flag account for re-authorization");
                        }
                    }

                    report.accounts.push(AccountSyncOutcome {
                        account: account.key,
                        new_messages: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        report
    }

    async fn poll_account(&self, account: &LinkedAccount) -> Result<usize, PollError> {
        // Eligibility is filtered at the query, but an account mutated
        // between select and poll still must not be polled cursorless.
        let Some(cursor) = &account.history_cursor else {
            return Ok(0);
        };

        let batch = self.gateway.list_changes_since(&account.key, cursor).await?;
        let discovered = batch.added_message_ids.len();

        for message_id in batch.added_message_ids {
            self.queue
                .enqueue(
                    &JobPayload::ProcessNewMessage {
                        account: account.key.clone(),
                        message_id,
                    },
                    self.retry_policy,
                )
                .await?;
        }

        accounts::advance_cursor(&self.db, &account.key, &batch.new_cursor).await?;

        if discovered > 0 {
            tracing::info!(account = %account.key, count = discovered,
                cursor = %batch.new_cursor, "discovered new messages");
        }
        Ok(discovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HistoryCursor;
    use crate::providers::email::{ChangeBatch, MockMailboxGateway};
    use crate::queue::{job_types, JobState};
    use mockall::predicate::eq;

    async fn seed_account(db: &Database, id: &str, cursor: Option<&str>) -> AccountKey {
        let key = AccountKey::google(id);
        accounts::insert(
            db,
            &LinkedAccount {
                key: key.clone(),
                user_id: UserId::from("user-1"),
                email_address: format!("{id}@example.com"),
                access_token: "ct".to_string(),
                refresh_token: None,
                history_cursor: cursor.map(HistoryCursor::from),
                last_polled_at: None,
                needs_reauth: false,
            },
        )
        .await
        .unwrap();
        key
    }

    fn service(db: &Database, gateway: MockMailboxGateway) -> SyncService {
        SyncService::new(
            db.clone(),
            Arc::new(gateway),
            JobQueue::new(db.clone()),
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn discovered_messages_become_jobs_and_cursor_advances() {
        let db = Database::open_in_memory().await.unwrap();
        let key = seed_account(&db, "a1", Some("100")).await;

        let mut gateway = MockMailboxGateway::new();
        gateway
            .expect_list_changes_since()
            .with(eq(key.clone()), eq(HistoryCursor::from("100")))
            .times(1)
            .returning(|_, _| {
                Ok(ChangeBatch {
                    added_message_ids: vec!["m1".into(), "m2".into()],
                    new_cursor: HistoryCursor::from("105"),
                })
            });

        let service = service(&db, gateway);
        let report = service.poll_eligible_accounts().await.unwrap();

        assert_eq!(report.total_new_messages, 2);
        assert_eq!(report.accounts.len(), 1);
        assert!(report.accounts[0].is_success());

        let queue = JobQueue::new(db.clone());
        assert_eq!(
            queue
                .count(job_types::PROCESS_NEW_MESSAGE, JobState::Pending)
                .await
                .unwrap(),
            2
        );

        let account = accounts::get(&db, &key).await.unwrap().unwrap();
        assert_eq!(account.history_cursor, Some(HistoryCursor::from("105")));
        assert!(account.last_polled_at.is_some());
    }

    #[tokio::test]
    async fn empty_change_set_advances_cursor_without_jobs() {
        let db = Database::open_in_memory().await.unwrap();
        let key = seed_account(&db, "a1", Some("100")).await;

        let mut gateway = MockMailboxGateway::new();
        gateway.expect_list_changes_since().returning(|_, cursor| {
            Ok(ChangeBatch {
                added_message_ids: vec![],
                new_cursor: cursor.clone(),
            })
        });

        let service = service(&db, gateway);
        let report = service.poll_eligible_accounts().await.unwrap();

        assert_eq!(report.total_new_messages, 0);
        let account = accounts::get(&db, &key).await.unwrap().unwrap();
        assert_eq!(account.history_cursor, Some(HistoryCursor::from("100")));
    }

    #[tokio::test]
    async fn one_failing_account_does_not_abort_the_pass() {
        let db = Database::open_in_memory().await.unwrap();
        let key_a = seed_account(&db, "aaa", Some("10")).await;
        let key_b = seed_account(&db, "bbb", Some("20")).await;
        let key_c = seed_account(&db, "ccc", Some("30")).await;

        let mut gateway = MockMailboxGateway::new();
        let failing = key_b.clone();
        gateway
            .expect_list_changes_since()
            .times(3)
            .returning(move |account, cursor| {
                if *account == failing {
                    Err(GatewayError::Transient("connection reset".to_string()))
                } else {
                    Ok(ChangeBatch {
                        added_message_ids: vec!["m1".into()],
                        new_cursor: HistoryCursor(format!("{}1", cursor.0)),
                    })
                }
            });

        let service = service(&db, gateway);
        let report = service.poll_eligible_accounts().await.unwrap();

        assert_eq!(report.total_new_messages, 2);
        let failed: Vec<_> = report.accounts.iter().filter(|a| !a.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].account, key_b);

        // Healthy accounts advanced; the failing one kept its cursor.
        let a = accounts::get(&db, &key_a).await.unwrap().unwrap();
        assert_eq!(a.history_cursor, Some(HistoryCursor::from("101")));
        let b = accounts::get(&db, &key_b).await.unwrap().unwrap();
        assert_eq!(b.history_cursor, Some(HistoryCursor::from("20")));
        let c = accounts::get(&db, &key_c).await.unwrap().unwrap();
        assert_eq!(c.history_cursor, Some(HistoryCursor::from("301")));
    }

    #[tokio::test]
    async fn revoked_grant_flags_account_and_leaves_cursor() {
        let db = Database::open_in_memory().await.unwrap();
        let revoked = seed_account(&db, "revoked", Some("50")).await;
        let healthy = seed_account(&db, "healthy", Some("60")).await;

        let mut gateway = MockMailboxGateway::new();
        let revoked_key = revoked.clone();
        gateway
            .expect_list_changes_since()
            .times(2)
            .returning(move |account, cursor| {
                if *account == revoked_key {
                    Err(GatewayError::ReauthorizationRequired(
                        "invalid_grant".to_string(),
                    ))
                } else {
                    Ok(ChangeBatch {
                        added_message_ids: vec![],
                        new_cursor: cursor.clone(),
                    })
                }
            });

        let service = service(&db, gateway);
        let report = service.poll_eligible_accounts().await.unwrap();

        let outcome = report
            .accounts
            .iter()
            .find(|a| a.account == revoked)
            .unwrap();
        assert!(!outcome.is_success());

        let flagged = accounts::get(&db, &revoked).await.unwrap().unwrap();
        assert!(flagged.needs_reauth);
        assert_eq!(flagged.history_cursor, Some(HistoryCursor::from("50")));

        assert!(report
            .accounts
            .iter()
            .find(|a| a.account == healthy)
            .unwrap()
            .is_success());

        // Next pass skips the flagged account entirely.
        assert_eq!(accounts::eligible(&db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cursor_never_regresses_across_passes() {
        let db = Database::open_in_memory().await.unwrap();
        let key = seed_account(&db, "a1", Some("100")).await;

        let mut gateway = MockMailboxGateway::new();
        let mut responses = vec![
            Ok(ChangeBatch {
                added_message_ids: vec![],
                new_cursor: HistoryCursor::from("100"),
            }),
            Ok(ChangeBatch {
                added_message_ids: vec!["m1".into()],
                new_cursor: HistoryCursor::from("107"),
            }),
            Err(GatewayError::Transient("timeout".to_string())),
        ]
        .into_iter();
        gateway
            .expect_list_changes_since()
            .times(3)
            .returning_st(move |_, _| responses.next().unwrap());

        let service = service(&db, gateway);

        // Same cursor back: stays at 100.
        service.poll_eligible_accounts().await.unwrap();
        let account = accounts::get(&db, &key).await.unwrap().unwrap();
        assert_eq!(account.history_cursor, Some(HistoryCursor::from("100")));

        // Advanced: 107.
        service.poll_eligible_accounts().await.unwrap();
        let account = accounts::get(&db, &key).await.unwrap().unwrap();
        assert_eq!(account.history_cursor, Some(HistoryCursor::from("107")));

        // Failure: unchanged, never reset.
        service.poll_eligible_accounts().await.unwrap();
        let account = accounts::get(&db, &key).await.unwrap().unwrap();
        assert_eq!(account.history_cursor, Some(HistoryCursor::from("107")));
    }

    #[tokio::test]
    async fn sync_now_with_zero_eligible_accounts_is_a_successful_noop() {
        let db = Database::open_in_memory().await.unwrap();
        // One account, but cursor-null: not eligible.
        seed_account(&db, "a1", None).await;

        let gateway = MockMailboxGateway::new();
        let service = service(&db, gateway);

        let report = service
            .sync_now_for_user(&UserId::from("user-1"))
            .await
            .unwrap();
        assert_eq!(report.total_new_messages, 0);
        assert!(report.accounts.is_empty());
    }

    #[tokio::test]
    async fn sync_now_only_touches_the_requesting_users_accounts() {
        let db = Database::open_in_memory().await.unwrap();
        seed_account(&db, "mine", Some("1")).await;

        let other_key = AccountKey::google("theirs");
        accounts::insert(
            &db,
            &LinkedAccount {
                key: other_key.clone(),
                user_id: UserId::from("user-2"),
                email_address: "theirs@example.com".to_string(),
                access_token: "ct".to_string(),
                refresh_token: None,
                history_cursor: Some("1".into()),
                last_polled_at: None,
                needs_reauth: false,
            },
        )
        .await
        .unwrap();

        let mut gateway = MockMailboxGateway::new();
        gateway
            .expect_list_changes_since()
            .times(1)
            .returning(|account, cursor| {
                assert_eq!(account.external_account_id, "mine");
                Ok(ChangeBatch {
                    added_message_ids: vec!["m1".into()],
                    new_cursor: cursor.clone(),
                })
            });

        let service = service(&db, gateway);
        let report = service
            .sync_now_for_user(&UserId::from("user-1"))
            .await
            .unwrap();

        assert_eq!(report.total_new_messages, 1);
        assert_eq!(report.accounts.len(), 1);
    }
}
