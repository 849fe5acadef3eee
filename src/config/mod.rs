//! Service configuration.

mod settings;

pub use settings::{AiSettings, OauthSettings, QueueSettings, Settings, SyncSettings};
