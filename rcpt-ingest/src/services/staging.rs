//! File staging manager
//!
//! Two-phase file location protocol: uploads land in the staging area and are
//! moved into `<permanent_root>/<year>/<category>/<name>` once extraction has
//! succeeded. Exactly one physical file exists per record at any time; a move
//! either completes or leaves the staged file where it was.

use chrono::Utc;
use rcpt_common::config::RootFolderLayout;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The only content type accepted for upload
pub const PDF_MIME: &str = "application/pdf";

/// Staging and relocation errors
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Only PDF files are allowed (declared type: {0})")]
    UnsupportedMediaType(String),

    #[error("Uploaded file is empty")]
    EmptyUpload,

    #[error("Invalid file name: {0:?}")]
    InvalidName(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StagingError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StagingError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of a successful `stage`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Declared name with whitespace replaced, used for the final file name
    pub sanitized_name: String,
    /// Absolute location inside the staging area
    pub path: PathBuf,
}

/// Owner of the staging area and the permanent storage root
#[derive(Debug, Clone)]
pub struct StagingArea {
    staging_dir: PathBuf,
    permanent_root: PathBuf,
}

impl StagingArea {
    pub fn new(staging_dir: impl Into<PathBuf>, permanent_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            permanent_root: permanent_root.into(),
        }
    }

    pub fn from_layout(layout: &RootFolderLayout) -> Self {
        Self::new(layout.staging_dir(), layout.permanent_dir())
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn permanent_root(&self) -> &Path {
        &self.permanent_root
    }

    /// Create both directories; they are independent of each other
    pub async fn ensure_directories(&self) -> Result<(), StagingError> {
        for dir in [&self.staging_dir, &self.permanent_root] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StagingError::io(dir, e))?;
        }
        Ok(())
    }

    /// Write an upload into the staging area
    ///
    /// Bytes go to a uniquely named `.part` file first and are renamed into
    /// place, so a crash never leaves a truncated file under a real name.
    pub async fn stage(
        &self,
        bytes: &[u8],
        declared_name: &str,
        content_type: Option<&str>,
    ) -> Result<StagedFile, StagingError> {
        let declared_type = content_type.unwrap_or("unknown");
        if !declared_type.eq_ignore_ascii_case(PDF_MIME) {
            return Err(StagingError::UnsupportedMediaType(declared_type.to_string()));
        }
        if bytes.is_empty() {
            return Err(StagingError::EmptyUpload);
        }
        if infer::get(bytes).map(|kind| kind.mime_type()) != Some(PDF_MIME) {
            warn!(file_name = %declared_name, "Declared PDF does not carry a PDF signature");
        }

        let sanitized_name = sanitize_file_name(declared_name)?;
        self.ensure_directories().await?;

        let part_path = self.staging_dir.join(format!(".{}.part", Uuid::new_v4()));
        tokio::fs::write(&part_path, bytes)
            .await
            .map_err(|e| StagingError::io(&part_path, e))?;

        let target = self.unique_staging_path(&sanitized_name).await;
        if let Err(e) = tokio::fs::rename(&part_path, &target).await {
            remove_file_best_effort(&part_path).await;
            return Err(StagingError::io(&target, e));
        }

        debug!(path = %target.display(), bytes = bytes.len(), "Staged upload");
        Ok(StagedFile {
            sanitized_name,
            path: target,
        })
    }

    /// `<millis>-<name>`, bumped until no file holds the name
    async fn unique_staging_path(&self, sanitized_name: &str) -> PathBuf {
        let mut stamp = Utc::now().timestamp_millis();
        loop {
            let candidate = self
                .staging_dir
                .join(format!("{}-{}", stamp, sanitized_name));
            match tokio::fs::try_exists(&candidate).await {
                Ok(true) => stamp += 1,
                _ => return candidate,
            }
        }
    }

    /// True when `path` sits inside the staging area
    pub fn is_staged(&self, path: &Path) -> bool {
        path.starts_with(&self.staging_dir)
    }

    /// Destination for a processed file
    pub fn final_path(&self, year: &str, category: &str, sanitized_name: &str) -> PathBuf {
        self.permanent_root
            .join(year)
            .join(category)
            .join(sanitized_name)
    }

    /// Move a file into its categorized permanent location
    ///
    /// Any file already at the destination is replaced (last processed wins).
    /// When the source already is the destination nothing happens. On failure
    /// the source stays in place.
    pub async fn finalize(
        &self,
        current_path: &Path,
        year: &str,
        category: &str,
        sanitized_name: &str,
    ) -> Result<PathBuf, StagingError> {
        for segment in [year, category, sanitized_name] {
            check_segment(segment)?;
        }

        let dest = self.final_path(year, category, sanitized_name);
        if same_location(current_path, &dest).await {
            debug!(path = %dest.display(), "File already at final location");
            return Ok(dest);
        }

        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StagingError::io(dir, e))?;
        }

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            info!(path = %dest.display(), "Replacing existing file at final location");
            tokio::fs::remove_file(&dest)
                .await
                .map_err(|e| StagingError::io(&dest, e))?;
        }

        if let Err(rename_err) = tokio::fs::rename(current_path, &dest).await {
            // Cross-device moves cannot rename; copy then drop the source
            debug!(error = %rename_err, "Rename failed, falling back to copy");
            if let Err(e) = tokio::fs::copy(current_path, &dest).await {
                remove_file_best_effort(&dest).await;
                return Err(StagingError::io(current_path, e));
            }
            remove_file_best_effort(current_path).await;
        }

        info!(
            from = %current_path.display(),
            to = %dest.display(),
            "Moved file to permanent storage"
        );
        Ok(dest)
    }

    /// Delete every file in the staging area
    ///
    /// Staged-but-unprocessed uploads are discarded; their records keep
    /// pointing at the staging path and fail validation afterwards.
    pub async fn purge_staging(&self) -> Result<usize, StagingError> {
        let mut entries = match tokio::fs::read_dir(&self.staging_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StagingError::io(&self.staging_dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StagingError::io(&self.staging_dir, e))?
        {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| StagingError::io(&path, e))?;
                removed += 1;
            }
        }

        warn!(removed, "Purged staging area; staged uploads were discarded");
        Ok(removed)
    }
}

/// Keep only the final path component and replace whitespace runs with `_`
pub fn sanitize_file_name(declared_name: &str) -> Result<String, StagingError> {
    let base = declared_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let sanitized = base.split_whitespace().collect::<Vec<_>>().join("_");

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        return Err(StagingError::InvalidName(declared_name.to_string()));
    }
    Ok(sanitized)
}

fn check_segment(segment: &str) -> Result<(), StagingError> {
    if segment.is_empty()
        || segment.chars().all(|c| c == '.')
        || segment.contains(['/', '\\'])
    {
        return Err(StagingError::InvalidName(segment.to_string()));
    }
    Ok(())
}

async fn same_location(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Remove a file, logging instead of failing
pub async fn remove_file_best_effort(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}
