//! Database initialization, storage primitives and row models

pub mod init;
pub mod models;
pub mod store;

pub use init::*;
pub use models::*;
pub use store::*;
