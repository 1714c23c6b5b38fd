//! # polycity common library
//!
//! Shared code for the polycity coordinator and its stage workers:
//! - Coordination store abstraction (hashes, lists, sets, counters)
//! - Durable stage queues
//! - Job, work item and failure record models
//! - Configuration loading
//! - SQLite bootstrap and lock retry

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod store;
pub mod time;

pub use error::{Error, Result};
