//! Dataset archive retrieval.
//!
//! Fetching is skipped when the dataset directory already holds a manifest, so
//! re-running the pipeline never downloads twice.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::MANIFEST_FILE_NAME;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

const ARCHIVE_FILE_NAME: &str = "dataset.zip";
const GOOGLE_DRIVE_URL: &str = "https://drive.google.com/uc?id=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    GoogleDrive { file_id: String },
    Url(String),
    Local(PathBuf),
}

impl ArchiveSource {
    /// Interpret a settings value: http(s) URLs, bare Google Drive file ids,
    /// and anything else as a local path.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.starts_with("http://") || value.starts_with("https://") {
            return Self::Url(value.to_string());
        }
        let looks_like_drive_id = value.len() >= 20
            && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            && !Path::new(value).exists();
        if looks_like_drive_id {
            return Self::GoogleDrive { file_id: value.to_string() };
        }
        Self::Local(PathBuf::from(value))
    }

    fn download_url(&self) -> Option<String> {
        match self {
            Self::GoogleDrive { file_id } => Some(format!("{GOOGLE_DRIVE_URL}{file_id}")),
            Self::Url(url) => Some(url.clone()),
            Self::Local(_) => None,
        }
    }
}

impl std::fmt::Display for ArchiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GoogleDrive { file_id } => write!(f, "google drive file {file_id}"),
            Self::Url(url) => write!(f, "{url}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// The directory already had a manifest.
    Skipped,
    Extracted { files: usize },
}

/// Populate `data_dir` from `source` unless it already has a manifest.
///
/// The downloaded archive is removed whether or not extraction succeeds, so a
/// failed attempt is retried on the next run.
pub async fn fetch_dataset(source: &ArchiveSource, data_dir: &Path) -> TrainingResult<FetchOutcome> {
    let manifest = data_dir.join(MANIFEST_FILE_NAME);
    if manifest.is_file() {
        tracing::info!("{} already exists, skipping dataset fetch", manifest.display());
        return Ok(FetchOutcome::Skipped);
    }

    tokio::fs::create_dir_all(data_dir)
        .await
        .map_err(|e| TrainingError::filesystem(data_dir, e))?;
    let archive = data_dir.join(ARCHIVE_FILE_NAME);

    let extracted = download_and_extract(source, &archive, data_dir).await;
    match tokio::fs::remove_file(&archive).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) if extracted.is_ok() => return Err(TrainingError::filesystem(&archive, e)),
        Err(e) => tracing::warn!("could not remove {}: {}", archive.display(), e),
    }
    let files = extracted?;

    tracing::info!("extracted {} files from {} into {}", files, source, data_dir.display());
    Ok(FetchOutcome::Extracted { files })
}

async fn download_and_extract(source: &ArchiveSource, archive: &Path, data_dir: &Path) -> TrainingResult<usize> {
    if let ArchiveSource::Local(path) = source {
        tokio::fs::copy(path, archive)
            .await
            .map_err(|e| TrainingError::Fetch(format!("cannot read archive {}: {e}", path.display())))?;
    } else if let Some(url) = source.download_url() {
        download(&url, archive).await?;
    }

    let dir = data_dir.to_path_buf();
    let archive_path = archive.to_path_buf();
    tokio::task::spawn_blocking(move || extract_zip(&archive_path, &dir))
        .await
        .map_err(|e| TrainingError::Fetch(format!("extraction task failed: {e}")))?
}

async fn download(url: &str, dest: &Path) -> TrainingResult<()> {
    tracing::info!("downloading dataset archive from {}", url);
    let response = reqwest::get(url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| TrainingError::Fetch(format!("download failed: {e}")))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| TrainingError::Fetch(format!("download interrupted: {e}")))?;

    tokio::fs::write(dest, &bytes)
        .await
        .map_err(|e| TrainingError::filesystem(dest, e))?;
    tracing::debug!("downloaded {} bytes to {}", bytes.len(), dest.display());
    Ok(())
}

/// Extract every file of a zip archive under `dest`. Entries whose names would
/// land outside `dest` are skipped.
fn extract_zip(archive: &Path, dest: &Path) -> TrainingResult<usize> {
    let file = File::open(archive).map_err(|e| TrainingError::filesystem(archive, e))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| TrainingError::Fetch(format!("failed to open zip archive: {e}")))?;

    let mut files = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| TrainingError::Fetch(format!("failed to read zip entry {i}: {e}")))?;

        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("skipping unsafe archive entry {:?}", entry.name());
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| TrainingError::filesystem(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrainingError::filesystem(parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| TrainingError::filesystem(&target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| TrainingError::filesystem(&target, e))?;
        files += 1;
    }

    Ok(files)
}
