//! Receipt lifecycle controller
//!
//! Orchestrates upload → validate → process → delete for one file record at
//! a time. The controller owns the ordering rules that keep the record and
//! the physical file consistent:
//!
//! - a path is written to the record only after the bytes are at that path
//! - a failed extraction marks the record invalid and leaves the file alone
//! - a failed move aborts before any database write
//! - the receipt and its file record are deleted in one transaction
//!
//! `process` and `delete` are serialized per file id, `upload` per declared
//! name.

use rcpt_common::db::{FileRecord, ReceiptRecord, ReceiptWithFile, Store, StoreTransaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::extraction::{ExtractedReceipt, ExtractionFailure, ReceiptExtractor};
use super::file_locks::KeyedLocks;
use super::staging::{remove_file_best_effort, sanitize_file_name, StagingArea, StagingError};
use crate::db::{files, receipts};
use crate::models::FileState;

/// Longest invalid_reason stored on a file record
pub const MAX_INVALID_REASON_CHARS: usize = 200;

/// Year directory for receipts without a usable purchase date
pub const UNDATED_DIR: &str = "undated";

/// Category directory for receipts without a category
pub const UNCATEGORIZED_DIR: &str = "uncategorized";

pub const REASON_MISSING_AT_VALIDATION: &str = "File not found at stored path.";
pub const REASON_MISSING_AT_PROCESSING: &str = "File not found during processing.";

/// Lifecycle errors, one variant per failure class callers must tell apart
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    NotFound(String),

    /// State machine violation, e.g. processing before validating
    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    /// Empty upload or unusable file name
    #[error("{0}")]
    InvalidUpload(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),

    /// Stage or move failure; no database write happened
    #[error("File system error: {0}")]
    Filesystem(StagingError),

    #[error("Database error: {0}")]
    Storage(#[from] rcpt_common::Error),

    /// The file moved but the record could not be updated to match
    #[error("File {file_id} was moved to {} but its record could not be updated: {source}", final_path.display())]
    Reconciliation {
        file_id: i64,
        final_path: PathBuf,
        #[source]
        source: rcpt_common::Error,
    },
}

impl From<StagingError> for LifecycleError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::UnsupportedMediaType(_) => {
                LifecycleError::UnsupportedMediaType(err.to_string())
            }
            StagingError::EmptyUpload | StagingError::InvalidName(_) => {
                LifecycleError::InvalidUpload(err.to_string())
            }
            StagingError::Io { .. } => LifecycleError::Filesystem(err),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Result of `upload`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub file_id: i64,
    pub file_name: String,
    pub file_path: PathBuf,
    /// False when an existing record with the same name was reset
    pub created: bool,
}

/// Result of `validate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub file_id: i64,
    pub is_valid: bool,
    pub invalid_reason: Option<String>,
}

/// Result of a successful `process`
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub file_id: i64,
    pub receipt: ReceiptRecord,
    /// False when an existing receipt was updated in place
    pub created: bool,
    pub final_path: PathBuf,
}

/// Result of `delete`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub receipt_id: i64,
    pub file_id: i64,
}

/// Receipt lifecycle controller
pub struct ReceiptLifecycle {
    store: Store,
    staging: StagingArea,
    extractor: Arc<dyn ReceiptExtractor>,
    file_locks: KeyedLocks<i64>,
    name_locks: KeyedLocks<String>,
}

impl ReceiptLifecycle {
    pub fn new(store: Store, staging: StagingArea, extractor: Arc<dyn ReceiptExtractor>) -> Self {
        Self {
            store,
            staging,
            extractor,
            file_locks: KeyedLocks::new(),
            name_locks: KeyedLocks::new(),
        }
    }

    /// Stage an uploaded PDF and create or reset its file record
    ///
    /// Uploading a name that already has a record resets that record to
    /// unvalidated and points it at the new bytes; the previous staged file
    /// is removed.
    pub async fn upload(
        &self,
        bytes: &[u8],
        declared_name: &str,
        content_type: Option<&str>,
    ) -> LifecycleResult<UploadOutcome> {
        let file_name = sanitize_file_name(declared_name)?;
        let _name_guard = self.name_locks.lock(file_name.clone()).await;

        let staged = self.staging.stage(bytes, declared_name, content_type).await?;
        let staged_path = path_string(&staged.path);

        match self.reset_existing(&staged.sanitized_name, &staged_path).await {
            Ok(Some((file_id, previous))) => {
                if previous != staged.path && self.staging.is_staged(&previous) {
                    remove_file_best_effort(&previous).await;
                }

                info!(
                    file_id,
                    file_name = %staged.sanitized_name,
                    path = %staged_path,
                    "Re-upload reset existing file record"
                );
                return Ok(UploadOutcome {
                    file_id,
                    file_name: staged.sanitized_name,
                    file_path: staged.path,
                    created: false,
                });
            }
            Ok(None) => {}
            Err(e) => {
                remove_file_best_effort(&staged.path).await;
                return Err(storage_error(e, &staged_path));
            }
        }

        let file_id =
            match files::insert_file(&self.store, &staged.sanitized_name, &staged_path).await {
                Ok(id) => id,
                Err(e) => {
                    remove_file_best_effort(&staged.path).await;
                    return Err(storage_error(e, &staged_path));
                }
            };

        info!(
            file_id,
            file_name = %staged.sanitized_name,
            path = %staged_path,
            "Uploaded new file"
        );
        Ok(UploadOutcome {
            file_id,
            file_name: staged.sanitized_name,
            file_path: staged.path,
            created: true,
        })
    }

    /// Check that the file still exists at its stored path
    ///
    /// A missing file is recorded on the record and reported through
    /// `is_valid == false`, not as an error.
    pub async fn validate(&self, file_id: i64) -> LifecycleResult<ValidateOutcome> {
        let _guard = self.file_locks.lock(file_id).await;
        let record = self.require_file(file_id).await?;

        if file_exists(Path::new(&record.file_path)).await {
            files::mark_valid(&self.store, file_id).await?;
            info!(file_id, "File validated");
            Ok(ValidateOutcome {
                file_id,
                is_valid: true,
                invalid_reason: None,
            })
        } else {
            files::mark_invalid(&self.store, file_id, REASON_MISSING_AT_VALIDATION).await?;
            warn!(file_id, path = %record.file_path, "Validation failed: file missing");
            Ok(ValidateOutcome {
                file_id,
                is_valid: false,
                invalid_reason: Some(REASON_MISSING_AT_VALIDATION.to_string()),
            })
        }
    }

    /// Extract receipt data, move the file into permanent storage and record
    /// the result
    pub async fn process(&self, file_id: i64) -> LifecycleResult<ProcessOutcome> {
        let _guard = self.file_locks.lock(file_id).await;
        let record = self.require_file(file_id).await?;

        let state = FileState::of(&record);
        if !state.can_process() {
            debug!(file_id, state = state.label(), "Process rejected");
            return Err(LifecycleError::PreconditionFailed(format!(
                "File {} is {}; validate it before processing.",
                file_id,
                state.label()
            )));
        }

        let current_path = PathBuf::from(&record.file_path);
        if !file_exists(&current_path).await {
            files::mark_invalid(&self.store, file_id, REASON_MISSING_AT_PROCESSING).await?;
            warn!(file_id, path = %record.file_path, "Processing failed: file missing");
            return Err(LifecycleError::NotFound(format!(
                "File {} not found at {}",
                file_id, record.file_path
            )));
        }

        info!(file_id, extractor = self.extractor.name(), "Extracting receipt");
        let extracted = match self.extractor.extract(&current_path).await {
            Ok(extracted) => extracted,
            Err(failure) => {
                self.record_extraction_failure(file_id, &failure).await;
                return Err(failure.into());
            }
        };

        let year = extracted
            .purchase_year()
            .unwrap_or_else(|| UNDATED_DIR.to_string());
        let category = extracted
            .category
            .clone()
            .unwrap_or_else(|| UNCATEGORIZED_DIR.to_string());

        let final_path = self
            .staging
            .finalize(&current_path, &year, &category, &record.file_name)
            .await
            .map_err(LifecycleError::Filesystem)?;

        let (receipt_id, created) = match self.record_success(file_id, &extracted, &final_path).await
        {
            Ok(written) => written,
            Err(first) => {
                warn!(file_id, error = %first, "Recording processed file failed, retrying once");
                self.record_success(file_id, &extracted, &final_path)
                    .await
                    .map_err(|source| {
                        error!(
                            file_id,
                            final_path = %final_path.display(),
                            error = %source,
                            "File moved but record update failed"
                        );
                        LifecycleError::Reconciliation {
                            file_id,
                            final_path: final_path.clone(),
                            source,
                        }
                    })?
            }
        };

        let receipt = receipts::load_receipt(&self.store, receipt_id)
            .await?
            .ok_or_else(|| {
                LifecycleError::NotFound(format!("Receipt {} vanished after write", receipt_id))
            })?;

        info!(
            file_id,
            receipt_id,
            created,
            path = %final_path.display(),
            "Receipt processed"
        );
        Ok(ProcessOutcome {
            file_id,
            receipt,
            created,
            final_path,
        })
    }

    /// Delete a receipt and its file record, then the physical file
    pub async fn delete(&self, receipt_id: i64) -> LifecycleResult<DeleteOutcome> {
        let file_id = self.require_receipt(receipt_id).await?.receipt_file_id;
        let _guard = self.file_locks.lock(file_id).await;

        // Re-read under the lock; a concurrent delete may have won
        let receipt = self.require_receipt(receipt_id).await?;
        let file = files::load_file(&self.store, file_id).await?;

        receipts::delete_receipt_and_file(&self.store, receipt_id, file_id)
            .await
            .map_err(|e| match e {
                rcpt_common::Error::NotFound(msg) => LifecycleError::NotFound(msg),
                other => LifecycleError::Storage(other),
            })?;

        let receipt_path = PathBuf::from(&receipt.file_path);
        let file_path = file.map(|f| PathBuf::from(f.file_path));
        if let Some(path) = &file_path {
            remove_file_best_effort(path).await;
        }
        if file_path.as_ref() != Some(&receipt_path) {
            remove_file_best_effort(&receipt_path).await;
        }

        info!(receipt_id, file_id, "Receipt deleted");
        Ok(DeleteOutcome {
            receipt_id,
            file_id,
        })
    }

    /// File records, newest first
    pub async fn list_files(&self) -> LifecycleResult<Vec<FileRecord>> {
        Ok(files::list_files(&self.store).await?)
    }

    /// Receipts with their file names, most recent purchase first
    pub async fn list_receipts(&self) -> LifecycleResult<Vec<ReceiptWithFile>> {
        Ok(receipts::list_receipts(&self.store).await?)
    }

    pub async fn get_receipt(&self, receipt_id: i64) -> LifecycleResult<ReceiptWithFile> {
        receipts::load_receipt_with_file(&self.store, receipt_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("Receipt {} not found", receipt_id)))
    }

    /// Reset the record already holding `file_name`, if one survives
    ///
    /// Returns the record id and its previous path. The record is re-read
    /// under its file lock; a `delete` holding that lock may have removed it.
    async fn reset_existing(
        &self,
        file_name: &str,
        staged_path: &str,
    ) -> rcpt_common::Result<Option<(i64, PathBuf)>> {
        let Some(seen) = files::load_file_by_name(&self.store, file_name).await? else {
            return Ok(None);
        };

        let _file_guard = self.file_locks.lock(seen.id).await;
        let current = match files::load_file_by_name(&self.store, file_name).await? {
            Some(record) if record.id == seen.id => record,
            Some(record) => {
                debug!(file_id = record.id, "Record replaced while waiting for its lock");
                return Ok(None);
            }
            None => {
                debug!(file_id = seen.id, "Record deleted while waiting for its lock");
                return Ok(None);
            }
        };

        if files::reset_for_reupload(&self.store, current.id, staged_path).await? == 0 {
            return Ok(None);
        }
        Ok(Some((current.id, PathBuf::from(current.file_path))))
    }

    async fn require_file(&self, file_id: i64) -> LifecycleResult<FileRecord> {
        files::load_file(&self.store, file_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("File {} not found", file_id)))
    }

    async fn require_receipt(&self, receipt_id: i64) -> LifecycleResult<ReceiptRecord> {
        receipts::load_receipt(&self.store, receipt_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("Receipt {} not found", receipt_id)))
    }

    /// Upsert the receipt and point the file record at its final path, in
    /// one transaction
    async fn record_success(
        &self,
        file_id: i64,
        extracted: &ExtractedReceipt,
        final_path: &Path,
    ) -> rcpt_common::Result<(i64, bool)> {
        let mut tx = self.store.begin().await?;
        match write_success(&mut tx, file_id, extracted, &path_string(final_path)).await {
            Ok(written) => {
                tx.commit().await?;
                Ok(written)
            }
            Err(e) => {
                tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn record_extraction_failure(&self, file_id: i64, failure: &ExtractionFailure) {
        let reason = truncate_reason(&failure.to_string());
        warn!(file_id, kind = failure.kind(), reason = %reason, "Extraction failed");
        if let Some(raw) = failure.raw_text() {
            debug!(file_id, raw_response = %raw, "Unparseable model output");
        }

        if let Err(e) = files::mark_invalid(&self.store, file_id, &reason).await {
            error!(file_id, error = %e, "Failed to record extraction failure");
        }
    }
}

async fn write_success(
    tx: &mut StoreTransaction,
    file_id: i64,
    extracted: &ExtractedReceipt,
    final_path: &str,
) -> rcpt_common::Result<(i64, bool)> {
    let written = receipts::upsert_receipt(tx, file_id, extracted, final_path).await?;
    if files::mark_processed(tx, file_id, final_path).await? == 0 {
        return Err(rcpt_common::Error::NotFound(format!(
            "File {} not found",
            file_id
        )));
    }
    Ok(written)
}

/// Bound a failure summary to [`MAX_INVALID_REASON_CHARS`] characters
pub fn truncate_reason(reason: &str) -> String {
    match reason.char_indices().nth(MAX_INVALID_REASON_CHARS) {
        Some((cut, _)) => reason[..cut].to_string(),
        None => reason.to_string(),
    }
}

fn storage_error(err: rcpt_common::Error, path: &str) -> LifecycleError {
    if err.is_unique_violation() {
        LifecycleError::Conflict(format!("A file record already uses {}", path))
    } else {
        LifecycleError::Storage(err)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
