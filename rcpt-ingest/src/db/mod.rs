//! Typed queries over the storage primitives

pub mod files;
pub mod receipts;
