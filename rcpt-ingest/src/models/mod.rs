//! Domain models

pub mod file_state;

pub use file_state::FileState;
