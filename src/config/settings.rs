//! Runtime configuration.
//!
//! All settings come from the environment, with working defaults for
//! everything except secrets. Missing secrets are not fatal at startup:
//! the encryption key is validated lazily at first use, and API
//! credentials fail the individual call that needs them.

use std::path::PathBuf;
use std::time::Duration;

use crate::providers::ai::GeminiClient;
use crate::queue::RetryPolicy;

/// Top-level service settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,
    /// Base64-encoded 256-bit key for token encryption
    /// (`openssl rand -base64 32`).
    pub encryption_key: Option<String>,
    /// OAuth client configuration.
    pub oauth: OauthSettings,
    /// AI backend configuration.
    pub ai: AiSettings,
    /// Discovery loop configuration.
    pub sync: SyncSettings,
    /// Job queue and worker configuration.
    pub queue: QueueSettings,
}

/// OAuth client credentials for the provider token endpoint.
#[derive(Debug, Clone, Default)]
pub struct OauthSettings {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

/// AI backend configuration.
#[derive(Debug, Clone)]
pub struct AiSettings {
    /// API key for the model backend.
    pub api_key: String,
    /// Model name.
    pub model: String,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: GeminiClient::DEFAULT_MODEL.to_string(),
        }
    }
}

/// Discovery loop configuration.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// Timeout applied to every remote call.
    pub http_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Job queue and worker configuration.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Attempt budget per job.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Workers for the message-processing pool.
    pub process_concurrency: usize,
    /// Workers for the unsubscribe pool.
    pub unsubscribe_concurrency: usize,
    /// How long an idle worker sleeps between claim attempts.
    pub idle_poll: Duration,
}

impl QueueSettings {
    /// The retry policy attached to newly-enqueued jobs.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            process_concurrency: 4,
            unsubscribe_concurrency: 1,
            idle_poll: Duration::from_millis(500),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("sift.db"),
            encryption_key: None,
            oauth: OauthSettings::default(),
            ai: AiSettings::default(),
            sync: SyncSettings::default(),
            queue: QueueSettings::default(),
        }
    }
}

impl Settings {
    /// Loads settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Settings::default();

        Self {
            database_path: env_string("SIFT_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            encryption_key: env_string("SIFT_ENCRYPTION_KEY"),
            oauth: OauthSettings {
                client_id: env_string("GOOGLE_CLIENT_ID").unwrap_or_default(),
                client_secret: env_string("GOOGLE_CLIENT_SECRET").unwrap_or_default(),
            },
            ai: AiSettings {
                api_key: env_string("GEMINI_API_KEY").unwrap_or_default(),
                model: env_string("SIFT_AI_MODEL").unwrap_or(defaults.ai.model),
            },
            sync: SyncSettings {
                poll_interval: env_secs("SIFT_POLL_INTERVAL_SECS")
                    .unwrap_or(defaults.sync.poll_interval),
                http_timeout: env_secs("SIFT_HTTP_TIMEOUT_SECS")
                    .unwrap_or(defaults.sync.http_timeout),
            },
            queue: QueueSettings {
                max_attempts: env_parse("SIFT_QUEUE_MAX_ATTEMPTS")
                    .unwrap_or(defaults.queue.max_attempts),
                base_delay: env_millis("SIFT_QUEUE_BASE_DELAY_MS")
                    .unwrap_or(defaults.queue.base_delay),
                process_concurrency: env_parse("SIFT_PROCESS_CONCURRENCY")
                    .unwrap_or(defaults.queue.process_concurrency),
                unsubscribe_concurrency: env_parse("SIFT_UNSUBSCRIBE_CONCURRENCY")
                    .unwrap_or(defaults.queue.unsubscribe_concurrency),
                idle_poll: defaults.queue.idle_poll,
            },
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name)?.parse().ok()
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse(name).map(Duration::from_secs)
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse(name).map(Duration::from_millis)
}
