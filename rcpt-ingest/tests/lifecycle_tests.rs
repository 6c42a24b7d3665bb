//! Integration tests for the receipt lifecycle controller
//!
//! Runs the real controller against a temporary SQLite database and root
//! folder, with a scripted extractor in place of the AI service.

mod helpers;

use helpers::{TestEnv, EXAMPLE_STORE_JSON, PDF_BYTES};
use rcpt_common::db::Quantity;
use rcpt_ingest::db::{files, receipts};
use rcpt_ingest::models::FileState;
use rcpt_ingest::services::lifecycle::{
    LifecycleError, MAX_INVALID_REASON_CHARS, REASON_MISSING_AT_PROCESSING,
    REASON_MISSING_AT_VALIDATION,
};
use rcpt_ingest::services::ExtractionFailure;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_upload_then_validate_marks_file_valid() {
    let env = TestEnv::new().await;

    let upload = env
        .lifecycle
        .upload(PDF_BYTES, "Corner Shop.pdf", Some("application/pdf"))
        .await
        .unwrap();
    assert!(upload.created);
    assert_eq!(upload.file_name, "Corner_Shop.pdf");
    assert!(upload.file_path.starts_with(env.staging_dir()));
    assert!(upload.file_path.exists());

    let record = files::load_file(&env.store, upload.file_id).await.unwrap().unwrap();
    assert_eq!(FileState::of(&record), FileState::Uploaded);

    let outcome = env.lifecycle.validate(upload.file_id).await.unwrap();
    assert!(outcome.is_valid);

    let record = files::load_file(&env.store, upload.file_id).await.unwrap().unwrap();
    assert!(record.is_valid);
    assert_eq!(record.invalid_reason, None);
    assert_eq!(FileState::of(&record), FileState::Validated);
}

#[tokio::test]
async fn test_reupload_same_name_keeps_single_record() {
    let env = TestEnv::new().await;

    let first = env
        .lifecycle
        .upload(PDF_BYTES, "dup.pdf", Some("application/pdf"))
        .await
        .unwrap();
    env.lifecycle.validate(first.file_id).await.unwrap();

    let second = env
        .lifecycle
        .upload(PDF_BYTES, "dup.pdf", Some("application/pdf"))
        .await
        .unwrap();

    assert!(!second.created);
    assert_eq!(second.file_id, first.file_id);
    assert_ne!(second.file_path, first.file_path);
    assert!(!first.file_path.exists(), "old staged file should be removed");
    assert!(second.file_path.exists());
    assert_eq!(files::count_files_named(&env.store, "dup.pdf").await.unwrap(), 1);

    let record = files::load_file(&env.store, first.file_id).await.unwrap().unwrap();
    assert_eq!(FileState::of(&record), FileState::Uploaded);
    assert!(!record.is_processed);
    assert_eq!(Path::new(&record.file_path), second.file_path.as_path());
}

#[tokio::test]
async fn test_upload_rejects_non_pdf() {
    let env = TestEnv::new().await;

    let err = env
        .lifecycle
        .upload(b"GIF89a", "photo.gif", Some("image/gif"))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::UnsupportedMediaType(_)));
    assert!(env.lifecycle.list_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_rejects_empty_file() {
    let env = TestEnv::new().await;
    let err = env
        .lifecycle
        .upload(b"", "empty.pdf", Some("application/pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidUpload(_)));
}

#[tokio::test]
async fn test_validate_missing_file_records_reason() {
    let env = TestEnv::new().await;
    let upload = env
        .lifecycle
        .upload(PDF_BYTES, "gone.pdf", Some("application/pdf"))
        .await
        .unwrap();
    std::fs::remove_file(&upload.file_path).unwrap();

    let outcome = env.lifecycle.validate(upload.file_id).await.unwrap();
    assert!(!outcome.is_valid);
    assert_eq!(outcome.invalid_reason.as_deref(), Some(REASON_MISSING_AT_VALIDATION));

    let record = files::load_file(&env.store, upload.file_id).await.unwrap().unwrap();
    assert_eq!(
        FileState::of(&record),
        FileState::Invalid(REASON_MISSING_AT_VALIDATION.to_string())
    );
}

#[tokio::test]
async fn test_concurrent_validate_of_unknown_id_is_not_found() {
    let env = TestEnv::new().await;

    let (a, b) = tokio::join!(env.lifecycle.validate(999), env.lifecycle.validate(999));

    assert!(matches!(a, Err(LifecycleError::NotFound(_))));
    assert!(matches!(b, Err(LifecycleError::NotFound(_))));
    assert!(env.lifecycle.list_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_process_requires_validation() {
    let env = TestEnv::new().await;
    let upload = env
        .lifecycle
        .upload(PDF_BYTES, "early.pdf", Some("application/pdf"))
        .await
        .unwrap();
    let before = files::load_file(&env.store, upload.file_id).await.unwrap().unwrap();

    let err = env.lifecycle.process(upload.file_id).await.unwrap_err();

    assert!(matches!(err, LifecycleError::PreconditionFailed(_)));
    let after = files::load_file(&env.store, upload.file_id).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(env.extractor.calls(), 0);
}

#[tokio::test]
async fn test_process_from_invalid_is_rejected() {
    let env = TestEnv::new().await;
    let upload = env
        .lifecycle
        .upload(PDF_BYTES, "invalid.pdf", Some("application/pdf"))
        .await
        .unwrap();
    std::fs::remove_file(&upload.file_path).unwrap();
    env.lifecycle.validate(upload.file_id).await.unwrap();
    let before = files::load_file(&env.store, upload.file_id).await.unwrap().unwrap();

    let err = env.lifecycle.process(upload.file_id).await.unwrap_err();

    assert!(matches!(err, LifecycleError::PreconditionFailed(_)));
    let after = files::load_file(&env.store, upload.file_id).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_process_unknown_file_is_not_found() {
    let env = TestEnv::new().await;
    let err = env.lifecycle.process(42).await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound(_)));
}

#[tokio::test]
async fn test_process_stores_normalized_receipt_and_moves_file() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("Example Store.pdf").await;
    let staged_path = files::load_file(&env.store, file_id)
        .await
        .unwrap()
        .unwrap()
        .file_path;
    env.extractor.push_text(EXAMPLE_STORE_JSON);

    let outcome = env.lifecycle.process(file_id).await.unwrap();

    assert!(outcome.created);
    let receipt = &outcome.receipt;
    assert_eq!(receipt.receipt_file_id, file_id);
    assert_eq!(receipt.category.as_deref(), Some("groceries"));
    assert_eq!(receipt.merchant_name.as_deref(), Some("Example Store"));
    assert_eq!(receipt.purchased_at.as_deref(), Some("2023-10-26 14:30:00"));
    assert_eq!(receipt.total_amount, Some(123.45));
    assert_eq!(receipt.items.len(), 1);
    assert_eq!(receipt.items[0].name, "Coffee");
    assert_eq!(receipt.items[0].unit_price, Some(4.5));
    assert_eq!(receipt.items[0].quantity, Quantity::Count(1.into()));
    assert!(receipt.file_path.contains("2023/groceries/"));
    assert_eq!(receipt.raw_extracted_text.as_deref(), Some(EXAMPLE_STORE_JSON));

    assert!(outcome.final_path.exists());
    assert!(outcome
        .final_path
        .starts_with(env.layout.permanent_dir().join("2023").join("groceries")));
    assert!(!Path::new(&staged_path).exists());

    let record = files::load_file(&env.store, file_id).await.unwrap().unwrap();
    assert!(record.is_processed);
    assert_eq!(record.invalid_reason, None);
    assert_eq!(record.file_path, receipt.file_path);
    assert_eq!(FileState::of(&record), FileState::Processed);
}

#[tokio::test]
async fn test_reprocessing_updates_existing_receipt() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("twice.pdf").await;

    env.extractor.push_text(EXAMPLE_STORE_JSON);
    let first = env.lifecycle.process(file_id).await.unwrap();

    env.extractor.push_text(
        r#"{"merchant_name":"Example Store","purchased_at":"2023-10-26","total_amount":"99.00","category":"Groceries"}"#,
    );
    let second = env.lifecycle.process(file_id).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.receipt.id, second.receipt.id);
    assert_eq!(second.receipt.total_amount, Some(99.0));
    assert_eq!(second.receipt.purchased_at.as_deref(), Some("2023-10-26 00:00:00"));
    assert!(second.receipt.items.is_empty());
    assert_eq!(second.final_path, first.final_path);
    assert!(second.final_path.exists());
    assert_eq!(
        receipts::count_receipts_for_file(&env.store, file_id).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_malformed_output_marks_invalid_and_keeps_file() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("garbled.pdf").await;
    let staged_path = files::load_file(&env.store, file_id)
        .await
        .unwrap()
        .unwrap()
        .file_path;
    env.extractor.push_text("Sorry, I cannot read this receipt.");

    let err = env.lifecycle.process(file_id).await.unwrap_err();

    match err {
        LifecycleError::Extraction(failure) => {
            assert_eq!(failure.kind(), "PARSE_FAILURE");
            assert_eq!(failure.raw_text(), Some("Sorry, I cannot read this receipt."));
        }
        other => panic!("expected extraction failure, got {:?}", other),
    }

    let record = files::load_file(&env.store, file_id).await.unwrap().unwrap();
    assert!(!record.is_processed);
    assert!(record.invalid_reason.is_some());
    assert_eq!(record.file_path, staged_path);
    assert!(Path::new(&staged_path).exists());
    assert_eq!(receipts::count_receipts_for_file(&env.store, file_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_extraction_can_be_retried_after_revalidation() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("retry.pdf").await;

    env.extractor
        .push_failure(ExtractionFailure::RateLimited("quota exceeded".to_string()));
    let err = env.lifecycle.process(file_id).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Extraction(ExtractionFailure::RateLimited(_))
    ));

    // Invalid until validated again
    let err = env.lifecycle.process(file_id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::PreconditionFailed(_)));

    assert!(env.lifecycle.validate(file_id).await.unwrap().is_valid);
    env.extractor.push_text(EXAMPLE_STORE_JSON);
    let outcome = env.lifecycle.process(file_id).await.unwrap();
    assert!(outcome.created);
}

#[tokio::test]
async fn test_invalid_reason_is_truncated() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("long-error.pdf").await;
    env.extractor
        .push_failure(ExtractionFailure::Adapter("x".repeat(1000)));

    env.lifecycle.process(file_id).await.unwrap_err();

    let record = files::load_file(&env.store, file_id).await.unwrap().unwrap();
    let reason = record.invalid_reason.unwrap();
    assert_eq!(reason.chars().count(), MAX_INVALID_REASON_CHARS);
}

#[tokio::test]
async fn test_process_with_missing_file_is_not_found() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("vanished.pdf").await;
    let record = files::load_file(&env.store, file_id).await.unwrap().unwrap();
    std::fs::remove_file(&record.file_path).unwrap();

    let err = env.lifecycle.process(file_id).await.unwrap_err();

    assert!(matches!(err, LifecycleError::NotFound(_)));
    let record = files::load_file(&env.store, file_id).await.unwrap().unwrap();
    assert_eq!(record.invalid_reason.as_deref(), Some(REASON_MISSING_AT_PROCESSING));
    assert!(!record.is_processed);
    assert_eq!(env.extractor.calls(), 0);
}

#[tokio::test]
async fn test_missing_date_and_category_use_fallback_directories() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("bare.pdf").await;
    env.extractor.push_text(r#"{"merchant_name":"Somewhere"}"#);

    let outcome = env.lifecycle.process(file_id).await.unwrap();

    assert_eq!(
        outcome.final_path,
        env.layout
            .permanent_dir()
            .join("undated")
            .join("uncategorized")
            .join("bare.pdf")
    );
    assert_eq!(outcome.receipt.category, None);
}

#[tokio::test]
async fn test_failed_move_leaves_database_untouched() {
    let env = TestEnv::with_broken_permanent_root().await;
    let file_id = env.uploaded_and_validated("stuck.pdf").await;
    let before = files::load_file(&env.store, file_id).await.unwrap().unwrap();
    env.extractor.push_text(EXAMPLE_STORE_JSON);

    let err = env.lifecycle.process(file_id).await.unwrap_err();

    assert!(matches!(err, LifecycleError::Filesystem(_)));
    let after = files::load_file(&env.store, file_id).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert!(Path::new(&after.file_path).exists());
    assert_eq!(receipts::count_receipts_for_file(&env.store, file_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_record_update_after_move_reports_reconciliation() {
    let env = TestEnv::new().await;
    env.store
        .execute(
            "CREATE TRIGGER block_receipt_insert BEFORE INSERT ON receipt \
             BEGIN SELECT RAISE(ABORT, 'receipt writes blocked'); END",
            &[],
        )
        .await
        .unwrap();

    let file_id = env.uploaded_and_validated("stranded.pdf").await;
    let before = files::load_file(&env.store, file_id).await.unwrap().unwrap();
    env.extractor.push_text(EXAMPLE_STORE_JSON);

    let err = env.lifecycle.process(file_id).await.unwrap_err();

    let final_path = match err {
        LifecycleError::Reconciliation {
            file_id: failed_id,
            final_path,
            ..
        } => {
            assert_eq!(failed_id, file_id);
            final_path
        }
        other => panic!("expected reconciliation error, got {:?}", other),
    };
    assert!(final_path.exists());
    assert!(final_path.ends_with("2023/groceries/stranded.pdf"));
    assert!(!Path::new(&before.file_path).exists());

    let after = files::load_file(&env.store, file_id).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(receipts::count_receipts_for_file(&env.store, file_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_process_calls_create_one_receipt() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("race.pdf").await;
    env.extractor.push_text(EXAMPLE_STORE_JSON);
    env.extractor.push_text(EXAMPLE_STORE_JSON);

    let (a, b) = tokio::join!(env.lifecycle.process(file_id), env.lifecycle.process(file_id));
    let a = a.unwrap();
    let b = b.unwrap();

    assert_ne!(a.created, b.created);
    assert_eq!(a.receipt.id, b.receipt.id);
    assert_eq!(receipts::count_receipts_for_file(&env.store, file_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_removes_rows_and_physical_file() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("delete-me.pdf").await;
    env.extractor.push_text(EXAMPLE_STORE_JSON);
    let processed = env.lifecycle.process(file_id).await.unwrap();
    let receipt_id = processed.receipt.id;

    let outcome = env.lifecycle.delete(receipt_id).await.unwrap();

    assert_eq!(outcome.file_id, file_id);
    assert!(files::load_file(&env.store, file_id).await.unwrap().is_none());
    assert!(matches!(
        env.lifecycle.get_receipt(receipt_id).await,
        Err(LifecycleError::NotFound(_))
    ));
    assert!(!processed.final_path.exists());
}

#[tokio::test]
async fn test_delete_succeeds_when_physical_file_already_gone() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("orphan.pdf").await;
    env.extractor.push_text(EXAMPLE_STORE_JSON);
    let processed = env.lifecycle.process(file_id).await.unwrap();
    std::fs::remove_file(&processed.final_path).unwrap();

    env.lifecycle.delete(processed.receipt.id).await.unwrap();
    assert!(env.lifecycle.list_receipts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reupload_racing_delete_creates_fresh_record() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("r.pdf").await;
    env.extractor.push_text(EXAMPLE_STORE_JSON);
    let receipt_id = env.lifecycle.process(file_id).await.unwrap().receipt.id;

    // Hold the file lock inside a second process call
    env.extractor.push_text(EXAMPLE_STORE_JSON);
    let gate = env.extractor.hold_next();
    let lifecycle = Arc::clone(&env.lifecycle);
    let process = tokio::spawn(async move { lifecycle.process(file_id).await });
    gate.entered.notified().await;

    // Queue a delete, then a re-upload, behind that lock
    let lifecycle = Arc::clone(&env.lifecycle);
    let delete = tokio::spawn(async move { lifecycle.delete(receipt_id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let lifecycle = Arc::clone(&env.lifecycle);
    let upload = tokio::spawn(async move {
        lifecycle
            .upload(PDF_BYTES, "r.pdf", Some("application/pdf"))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    gate.release.notify_one();
    process.await.unwrap().unwrap();
    delete.await.unwrap().unwrap();
    let uploaded = upload.await.unwrap().unwrap();

    assert!(uploaded.created);
    assert_ne!(uploaded.file_id, file_id);
    assert!(uploaded.file_path.exists());

    let record = files::load_file(&env.store, uploaded.file_id)
        .await
        .unwrap()
        .expect("re-uploaded file must have a record");
    assert_eq!(record.file_name, "r.pdf");
    assert_eq!(FileState::of(&record), FileState::Uploaded);
    assert_eq!(env.lifecycle.list_files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_with_unknown_receipt_keeps_file_row() {
    let env = TestEnv::new().await;
    let file_id = env.uploaded_and_validated("kept.pdf").await;

    let err = receipts::delete_receipt_and_file(&env.store, 999, file_id)
        .await
        .unwrap_err();

    assert!(matches!(err, rcpt_common::Error::NotFound(_)));
    assert!(files::load_file(&env.store, file_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_unknown_receipt_is_not_found() {
    let env = TestEnv::new().await;
    assert!(matches!(
        env.lifecycle.delete(7).await,
        Err(LifecycleError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_receipts_orders_by_purchase_date() {
    let env = TestEnv::new().await;

    let older = env.uploaded_and_validated("older.pdf").await;
    env.extractor.push_text(
        r#"{"merchant_name":"Old","purchased_at":"2021-01-05","category":"fuel"}"#,
    );
    env.lifecycle.process(older).await.unwrap();

    let newer = env.uploaded_and_validated("newer.pdf").await;
    env.extractor.push_text(
        r#"{"merchant_name":"New","purchased_at":"2024-03-01 09:15:00","category":"fuel"}"#,
    );
    env.lifecycle.process(newer).await.unwrap();

    let listed = env.lifecycle.list_receipts().await.unwrap();
    let names: Vec<_> = listed
        .iter()
        .map(|r| r.receipt.merchant_name.clone().unwrap())
        .collect();
    assert_eq!(names, vec!["New", "Old"]);
    assert_eq!(listed[0].original_file_name, "newer.pdf");

    let fetched = env.lifecycle.get_receipt(listed[1].receipt.id).await.unwrap();
    assert_eq!(fetched.original_file_name, "older.pdf");
}

#[tokio::test]
async fn test_list_files_newest_first() {
    let env = TestEnv::new().await;
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        env.lifecycle
            .upload(PDF_BYTES, name, Some("application/pdf"))
            .await
            .unwrap();
    }

    let listed = env.lifecycle.list_files().await.unwrap();
    let names: Vec<_> = listed.iter().map(|f| f.file_name.as_str()).collect();
    assert_eq!(names, vec!["c.pdf", "b.pdf", "a.pdf"]);
}
