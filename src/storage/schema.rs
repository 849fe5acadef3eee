//! SQL schema definitions as const strings.
//!
//! Contains the complete SQLite schema for the sift triage engine.

/// SQL to create the accounts table.
///
/// One row per OAuth-linked mailbox, keyed by (provider, external account
/// id). Token columns hold AES-256-GCM ciphertext, never plaintext.
/// `history_cursor` is NULL until the bootstrap profile fetch succeeds.
pub const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    provider TEXT NOT NULL,
    external_account_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    email_address TEXT NOT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT,
    history_cursor TEXT,
    last_polled_at TEXT,
    needs_reauth INTEGER DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (provider, external_account_id)
)
"#;

/// SQL to create the accounts index.
pub const CREATE_ACCOUNTS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_accounts_user ON accounts(user_id)
"#;

/// SQL to create the categories table.
pub const CREATE_CATEGORIES: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
)
"#;

/// SQL to create the categories index.
pub const CREATE_CATEGORIES_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_categories_user ON categories(user_id)
"#;

/// SQL to create the messages table.
///
/// The composite primary key is the idempotency boundary for the triage
/// pipeline: re-processing a delivered-again job upserts into the same row.
/// Deleting a category must not delete its messages, hence SET NULL.
pub const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    provider TEXT NOT NULL,
    external_account_id TEXT NOT NULL,
    provider_message_id TEXT NOT NULL,
    thread_id TEXT,
    category_id TEXT REFERENCES categories(id) ON DELETE SET NULL,
    subject TEXT NOT NULL DEFAULT '',
    from_address TEXT NOT NULL DEFAULT '',
    to_address TEXT NOT NULL DEFAULT '',
    snippet TEXT,
    body_text TEXT NOT NULL DEFAULT '',
    summary TEXT NOT NULL DEFAULT '',
    classification TEXT NOT NULL DEFAULT '{}',
    archived INTEGER DEFAULT 0,
    unsubscribed INTEGER DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (provider, external_account_id, provider_message_id)
)
"#;

/// SQL to create message indexes.
pub const CREATE_MESSAGE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_account ON messages(provider, external_account_id);
CREATE INDEX IF NOT EXISTS idx_messages_category ON messages(category_id)
"#;

/// SQL to create the jobs table.
///
/// Durable backing store for the job queue. `run_at` gates when a pending
/// job becomes claimable; failed jobs stay inspectable rather than being
/// deleted.
pub const CREATE_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'pending',
    attempts_made INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    backoff_base_ms INTEGER NOT NULL,
    run_at TEXT NOT NULL,
    claimed_at TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the jobs index.
pub const CREATE_JOBS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_jobs_claimable ON jobs(job_type, state, run_at)
"#;

/// Returns all schema creation statements in order.
pub fn all_migrations() -> Vec<&'static str> {
    vec![
        CREATE_ACCOUNTS,
        CREATE_ACCOUNTS_INDEX,
        CREATE_CATEGORIES,
        CREATE_CATEGORIES_INDEX,
        CREATE_MESSAGES,
        CREATE_MESSAGE_INDEXES,
        CREATE_JOBS,
        CREATE_JOBS_INDEX,
    ]
}
