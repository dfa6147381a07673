//! llmpool - LLM provider pools with priority failover
//!
//! Routes chat requests for a logical pool (`metadata`, `analysis`) across
//! the configured upstream providers: primary first, then by priority, each
//! channel retried a bounded number of times before failing over.

pub mod adapter;
pub mod api;
pub mod config;
pub mod error;
pub mod pool;
pub mod router;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
