//! File lifecycle state machine
//!
//! Uploaded → Validated → Processed, with Invalid(reason) reachable from any
//! state when validation or processing fails. The state is derived from the
//! record's flags rather than stored separately.

use rcpt_common::db::FileRecord;
use serde::Serialize;

/// Lifecycle state of one file record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "UPPERCASE")]
pub enum FileState {
    /// Uploaded, not yet validated
    Uploaded,
    /// Physically present at its stored path
    Validated,
    /// Extraction succeeded; file sits in permanent storage
    Processed,
    /// Validation or processing failed
    Invalid(String),
}

impl FileState {
    pub fn of(record: &FileRecord) -> Self {
        match (record.is_valid, record.is_processed, &record.invalid_reason) {
            (false, _, Some(reason)) => FileState::Invalid(reason.clone()),
            (false, _, None) => FileState::Uploaded,
            (true, true, _) => FileState::Processed,
            (true, false, _) => FileState::Validated,
        }
    }

    /// Processing is allowed from Validated, and again from Processed
    pub fn can_process(&self) -> bool {
        matches!(self, FileState::Validated | FileState::Processed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileState::Uploaded => "uploaded",
            FileState::Validated => "validated",
            FileState::Processed => "processed",
            FileState::Invalid(_) => "invalid",
        }
    }
}
