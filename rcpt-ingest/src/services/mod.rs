//! Services for receipt ingestion

pub mod extraction;
pub mod file_locks;
pub mod gemini_client;
pub mod lifecycle;
pub mod staging;

pub use extraction::{
    parse_model_output, ExtractedReceipt, ExtractionFailure, ModelOutput, ReceiptExtractor,
};
pub use file_locks::{KeyGuard, KeyedLocks};
pub use gemini_client::GeminiExtractor;
pub use lifecycle::{
    DeleteOutcome, LifecycleError, ProcessOutcome, ReceiptLifecycle, UploadOutcome,
    ValidateOutcome,
};
pub use staging::{StagedFile, StagingArea, StagingError};
