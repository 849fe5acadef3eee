//! sift - incremental mailbox sync and AI triage engine
//!
//! This crate continuously ingests new email arriving in linked Gmail
//! mailboxes, classifies and summarizes each message with an AI model, and
//! archives it in the remote inbox. Discovery is cursor-based and
//! per-account; processing flows through a durable, retrying job queue with
//! idempotent handlers, so nothing is lost across restarts or transient
//! provider failures.

pub mod config;
pub mod domain;
pub mod providers;
pub mod queue;
pub mod services;
pub mod storage;
