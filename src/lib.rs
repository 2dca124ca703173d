//! Shelfmark library crate
//!
//! Re-exports core modules for integration tests and external use.

pub mod api;
pub mod cache;
pub mod community;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod sharing;
pub mod sync;
pub mod validation;
pub mod worker;

// Re-export commonly used types
pub use cache::Cache;
pub use config::Config;
pub use database::Database;
pub use error::{Error, Result};
pub use sync::Broker;
pub use worker::WorkerPool;
