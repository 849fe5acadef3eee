//! Mailbox provider implementations.

mod gmail;
mod traits;

pub use gmail::{GmailGateway, OauthConfig};
pub use traits::{
    ChangeBatch, GatewayError, MailboxGateway, MailboxProfile, MessageContent, Result,
};

#[cfg(test)]
pub use traits::MockMailboxGateway;
