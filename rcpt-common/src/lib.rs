//! # rcpt Common Library
//!
//! Shared code for the receipt ingest service:
//! - Database initialization, schema and the storage primitives
//! - FileRecord / ReceiptRecord row models
//! - Configuration loading and root folder layout
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
