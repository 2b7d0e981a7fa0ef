//! Speaker dataset manifest: reading, filtering and rewriting `metadata.csv`.
//!
//! The manifest is a pipe-delimited two-column table (`file|text`) without a
//! header row or quoting; a `"` is part of the text. Sanitizing keeps only rows whose audio file exists under the
//! dataset root and whose transcript is non-empty after trimming.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::{write_atomic, MANIFEST_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

const DELIMITER: u8 = b'|';

/// One `(audio, transcript)` pair of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Audio file path, relative to the dataset root.
    pub audio_reference: String,
    pub transcript: String,
}

pub type Manifest = Vec<ManifestEntry>;

#[derive(Debug, Clone, Default)]
pub struct SanitizeOptions {
    /// Copy the original manifest to `metadata.csv.bak` before replacing it.
    pub keep_backup: bool,
}

/// Row counts from one sanitizer pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizeReport {
    pub total: usize,
    pub kept: usize,
    pub missing_audio: usize,
    pub empty_transcript: usize,
}

impl SanitizeReport {
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.total - self.kept
    }
}

/// Parse a manifest file.
///
/// Fields are trimmed. A row with only one field gets an empty transcript;
/// a row with more than two fields is malformed.
pub fn read_manifest(path: &Path) -> TrainingResult<Manifest> {
    let file = std::fs::File::open(path)
        .map_err(|e| TrainingError::manifest(path, format!("cannot open manifest: {e}")))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(file);

    let mut entries = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| TrainingError::manifest(path, e.to_string()))?;
        let row = record.position().map_or(idx as u64 + 1, |p| p.line());

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() > 2 {
            return Err(TrainingError::manifest(
                path,
                format!("row {row}: expected 2 fields, found {}", record.len()),
            ));
        }

        entries.push(ManifestEntry {
            audio_reference: record.get(0).unwrap_or_default().trim().to_string(),
            transcript: record.get(1).unwrap_or_default().trim().to_string(),
        });
    }

    Ok(entries)
}

/// Serialize entries to the manifest format and atomically replace `path`.
pub fn write_manifest(path: &Path, entries: &[ManifestEntry]) -> TrainingResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(Vec::new());

    for entry in entries {
        writer.write_record([entry.audio_reference.as_str(), entry.transcript.as_str()])?;
    }

    let bytes = writer.into_inner().map_err(|e| TrainingError::Io(e.into_error()))?;
    write_atomic(path, &bytes)
}

/// Resolve an audio reference against the dataset root.
///
/// Only relative references that stay inside the root resolve.
fn resolve_audio(root: &Path, reference: &str) -> Option<PathBuf> {
    if reference.is_empty() {
        return None;
    }

    let relative = Path::new(reference);
    let inside_root = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !inside_root {
        return None;
    }

    Some(root.join(relative))
}

/// Keep the entries that have a readable audio file and a transcript.
pub fn filter_entries(root: &Path, entries: Manifest) -> (Manifest, SanitizeReport) {
    let mut report = SanitizeReport { total: entries.len(), ..SanitizeReport::default() };

    let kept: Manifest = entries
        .into_iter()
        .filter(|entry| {
            let has_audio = resolve_audio(root, &entry.audio_reference).is_some_and(|p| p.is_file());
            if !has_audio {
                tracing::debug!("dropping {:?}: audio file not found", entry.audio_reference);
                report.missing_audio += 1;
                return false;
            }
            if entry.transcript.trim().is_empty() {
                tracing::debug!("dropping {:?}: empty transcript", entry.audio_reference);
                report.empty_transcript += 1;
                return false;
            }
            true
        })
        .collect();

    report.kept = kept.len();
    (kept, report)
}

/// Rewrite `<dataset_dir>/metadata.csv` so it holds only usable entries.
///
/// Row order among survivors is preserved, and running this on its own output
/// changes nothing.
pub fn sanitize_manifest(dataset_dir: &Path, options: &SanitizeOptions) -> TrainingResult<SanitizeReport> {
    let path = dataset_dir.join(MANIFEST_FILE_NAME);
    let entries = read_manifest(&path)?;
    let (kept, report) = filter_entries(dataset_dir, entries);

    if options.keep_backup {
        let backup = backup_path(&path);
        std::fs::copy(&path, &backup).map_err(|e| TrainingError::filesystem(&backup, e))?;
        tracing::debug!("backed up manifest to {}", backup.display());
    }

    write_manifest(&path, &kept)?;

    tracing::info!(
        "sanitized {}: kept {} of {} rows ({} missing audio, {} empty transcript)",
        path.display(),
        report.kept,
        report.total,
        report.missing_audio,
        report.empty_transcript
    );
    Ok(report)
}

fn backup_path(manifest: &Path) -> PathBuf {
    let mut name = manifest.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    manifest.with_file_name(name)
}
