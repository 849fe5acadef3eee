//! sift - entry point for the background triage service.
//!
//! Wires storage, providers, the job queue, worker pools, and the poller,
//! then runs until interrupted.

use std::sync::Arc;

use anyhow::Context;

use sift::config::Settings;
use sift::providers::ai::{AiClient, GeminiClient};
use sift::providers::email::{GmailGateway, MailboxGateway, OauthConfig};
use sift::queue::{job_types, JobQueue, WorkerPool};
use sift::services::{CredentialStore, Poller, SyncService, TriageService};
use sift::storage::{Database, TokenCipher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting sift");

    let settings = Settings::from_env();

    let db = Database::open(&settings.database_path)
        .await
        .with_context(|| format!("open database at {}", settings.database_path.display()))?;

    let credentials = Arc::new(CredentialStore::new(
        db.clone(),
        TokenCipher::new(settings.encryption_key.clone()),
    ));

    let gateway: Arc<dyn MailboxGateway> = Arc::new(GmailGateway::new(
        OauthConfig {
            client_id: settings.oauth.client_id.clone(),
            client_secret: settings.oauth.client_secret.clone(),
        },
        Arc::clone(&credentials),
        settings.sync.http_timeout,
    ));

    let ai: Arc<dyn AiClient> = Arc::new(GeminiClient::new(
        settings.ai.api_key.clone(),
        settings.ai.model.clone(),
        settings.sync.http_timeout,
    ));

    let queue = JobQueue::new(db.clone());
    queue.recover().await.context("recover in-flight jobs")?;

    let triage = Arc::new(TriageService::new(
        db.clone(),
        Arc::clone(&gateway),
        Arc::clone(&ai),
    ));

    let process_pool = WorkerPool::spawn(
        queue.clone(),
        job_types::PROCESS_NEW_MESSAGE,
        settings.queue.process_concurrency,
        triage.clone(),
        settings.queue.idle_poll,
    );
    let unsubscribe_pool = WorkerPool::spawn(
        queue.clone(),
        job_types::UNSUBSCRIBE,
        settings.queue.unsubscribe_concurrency,
        triage,
        settings.queue.idle_poll,
    );

    let sync = Arc::new(SyncService::new(
        db,
        gateway,
        queue,
        settings.queue.retry_policy(),
    ));
    let poller = Arc::new(Poller::new(sync, settings.sync.poll_interval));
    let poller_handle = Arc::clone(&poller).start();

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal")?;
    tracing::info!("shutdown requested");

    poller.stop();
    poller_handle.abort();
    let _ = poller_handle.await;

    process_pool.shutdown().await;
    unsubscribe_pool.shutdown().await;

    tracing::info!("sift stopped");
    Ok(())
}
