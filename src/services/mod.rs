//! Business services layer.
//!
//! Services sit between the entry point and the infrastructure layer,
//! orchestrating providers, the queue, and storage:
//!
//! - [`CredentialStore`]: encrypted-at-rest OAuth token access and rotation
//! - [`AccountService`]: mailbox linkage (bootstrap-before-persist) and disconnect
//! - [`SyncService`]: one discovery pass per account; the "sync now" surface
//! - [`Poller`]: the recurring timer driving background discovery
//! - [`TriageService`]: the per-message fetch → classify → summarize →
//!   persist → archive pipeline

mod account_service;
pub mod credential_service;
mod poller_service;
mod sync_service;
mod triage_service;

pub use account_service::{AccountError, AccountService};
pub use credential_service::{CredentialError, CredentialStore, Credentials};
pub use poller_service::Poller;
pub use sync_service::{AccountSyncOutcome, SyncReport, SyncService};
pub use triage_service::{TriageError, TriageService};
