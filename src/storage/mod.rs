//! Storage layer: SQLite persistence and at-rest token encryption.

pub mod crypto;
pub mod database;
pub mod queries;
pub mod schema;

pub use crypto::{CryptoError, TokenCipher};
pub use database::{Database, DatabaseError};
