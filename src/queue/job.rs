//! Typed job payloads.
//!
//! Each variant is one unit of background work. The queue never
//! deduplicates payloads; duplicate deliveries are absorbed downstream by
//! the message upsert key.

use serde::{Deserialize, Serialize};

use crate::domain::{AccountKey, ProviderMessageId, UserId};

/// Job type discriminators. Worker pools are partitioned on these, so a
/// stall in one type cannot starve another.
pub mod job_types {
    /// Process one newly-discovered message.
    pub const PROCESS_NEW_MESSAGE: &str = "process_new_message";
    /// Run the unsubscribe flow for a processed message.
    pub const UNSUBSCRIBE: &str = "unsubscribe";

    /// All known job types, for startup wiring.
    pub const ALL: &[&str] = &[PROCESS_NEW_MESSAGE, UNSUBSCRIBE];
}

/// A durable unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// Run the triage pipeline for one discovered message.
    ProcessNewMessage {
        /// The mailbox the message was discovered in.
        account: AccountKey,
        /// Provider-assigned message id.
        message_id: ProviderMessageId,
    },
    /// Unsubscribe from the sender of a processed message. Routed to its
    /// own worker pool; the pipeline itself is future work.
    Unsubscribe {
        /// The message whose sender to unsubscribe from.
        message_id: ProviderMessageId,
        /// The requesting user.
        user_id: UserId,
    },
}

impl JobPayload {
    /// The queue partition this payload belongs to.
    pub fn job_type(&self) -> &'static str {
        match self {
            JobPayload::ProcessNewMessage { .. } => job_types::PROCESS_NEW_MESSAGE,
            JobPayload::Unsubscribe { .. } => job_types::UNSUBSCRIBE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serialization_is_tagged() {
        let payload = JobPayload::ProcessNewMessage {
            account: AccountKey::google("a1"),
            message_id: ProviderMessageId::from("m1"),
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"type\":\"process_new_message\""));

        let back: JobPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn unsubscribe_round_trips() {
        let payload = JobPayload::Unsubscribe {
            message_id: ProviderMessageId::from("m1"),
            user_id: UserId::from("u1"),
        };

        let json = serde_json::to_string(&payload).unwrap();
        let back: JobPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn job_type_matches_variant() {
        let process = JobPayload::ProcessNewMessage {
            account: AccountKey::google("a1"),
            message_id: ProviderMessageId::from("m1"),
        };
        assert_eq!(process.job_type(), job_types::PROCESS_NEW_MESSAGE);

        let unsubscribe = JobPayload::Unsubscribe {
            message_id: ProviderMessageId::from("m1"),
            user_id: UserId::from("u1"),
        };
        assert_eq!(unsubscribe.job_type(), job_types::UNSUBSCRIBE);
    }
}
