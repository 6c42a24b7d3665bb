//! Test helper utilities
//!
//! Shared fixtures for rcpt-ingest integration tests: a temporary root
//! folder with a real SQLite database, and a scripted extractor standing in
//! for the AI service.

#![allow(dead_code)]

use async_trait::async_trait;
use rcpt_common::config::RootFolderLayout;
use rcpt_common::db::{init_database, Store};
use rcpt_ingest::services::extraction::{
    parse_model_output, ExtractedReceipt, ExtractionFailure, ReceiptExtractor,
};
use rcpt_ingest::services::{ReceiptLifecycle, StagingArea};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const PDF_BYTES: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\ntrailer\n<<>>\n%%EOF\n";

pub const EXAMPLE_STORE_JSON: &str = r#"{"merchant_name":"Example Store","purchased_at":"2023-10-26 14:30:00","total_amount":123.45,"category":"Groceries","items":[{"name":"Coffee","price":4.5,"quantity":1}]}"#;

/// Extractor that replays queued responses in order
///
/// `Ok(text)` is run through the real normalizer, so malformed text yields a
/// parse failure exactly as a model response would.
#[derive(Default)]
pub struct ScriptedExtractor {
    responses: Mutex<VecDeque<Result<String, ExtractionFailure>>>,
    calls: AtomicUsize,
    gate: Mutex<Option<ExtractionGate>>,
}

/// Holds the next `extract` call open until released
#[derive(Clone, Default)]
pub struct ExtractionGate {
    /// Signalled once the gated call has started
    pub entered: Arc<Notify>,
    /// Signal to let the gated call return
    pub release: Arc<Notify>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: &str) {
        self.responses.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn push_failure(&self, failure: ExtractionFailure) {
        self.responses.lock().unwrap().push_back(Err(failure));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Gate the next `extract` call; it blocks inside the controller's file
    /// lock until `release` is notified
    pub fn hold_next(&self) -> ExtractionGate {
        let gate = ExtractionGate::default();
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl ReceiptExtractor for ScriptedExtractor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn extract(&self, _file_path: &Path) -> Result<ExtractedReceipt, ExtractionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => parse_model_output(&text).into_result(),
            Some(Err(failure)) => Err(failure),
            None => Err(ExtractionFailure::Adapter("no scripted response".to_string())),
        }
    }
}

/// Temporary root folder with database, staging area and controller
pub struct TestEnv {
    pub dir: TempDir,
    pub layout: RootFolderLayout,
    pub store: Store,
    pub extractor: Arc<ScriptedExtractor>,
    pub lifecycle: Arc<ReceiptLifecycle>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let layout = RootFolderLayout::new(dir.path());
        layout.ensure_directories().expect("Failed to create layout");
        Self::with_staging(dir, layout.clone(), StagingArea::from_layout(&layout)).await
    }

    /// Environment whose permanent root is a regular file, so every move fails
    pub async fn with_broken_permanent_root() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let layout = RootFolderLayout::new(dir.path());
        layout.ensure_directories().expect("Failed to create layout");
        let blocker = dir.path().join("not-a-directory");
        std::fs::write(&blocker, b"x").unwrap();
        let staging = StagingArea::new(layout.staging_dir(), blocker);
        Self::with_staging(dir, layout, staging).await
    }

    async fn with_staging(dir: TempDir, layout: RootFolderLayout, staging: StagingArea) -> Self {
        let pool = init_database(&layout.database_path())
            .await
            .expect("Failed to init database");
        let store = Store::new(pool);
        let extractor = Arc::new(ScriptedExtractor::new());
        let lifecycle = Arc::new(ReceiptLifecycle::new(
            store.clone(),
            staging,
            extractor.clone(),
        ));

        Self {
            dir,
            layout,
            store,
            extractor,
            lifecycle,
        }
    }

    /// Upload and validate a PDF, returning the file id
    pub async fn uploaded_and_validated(&self, name: &str) -> i64 {
        let upload = self
            .lifecycle
            .upload(PDF_BYTES, name, Some("application/pdf"))
            .await
            .expect("upload failed");
        let validated = self
            .lifecycle
            .validate(upload.file_id)
            .await
            .expect("validate failed");
        assert!(validated.is_valid);
        upload.file_id
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.layout.staging_dir()
    }
}
