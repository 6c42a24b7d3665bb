//! HTTP API handlers for rcpt-ingest
//!
//! Thin pass-through over [`crate::services::ReceiptLifecycle`]; JSON
//! envelopes use camelCase keys, records keep their column names.

pub mod files;
pub mod health;
pub mod receipts;
pub mod upload;

pub use files::file_routes;
pub use health::health_routes;
pub use receipts::receipt_routes;
pub use upload::upload_routes;
