use crate::error::{TrainingError, TrainingResult};
use crate::settings::PipelineSettings;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File name of the manifest inside a dataset root.
pub const MANIFEST_FILE_NAME: &str = "metadata.csv";

/// Well-known filesystem locations shared by the pipeline stages.
///
/// Stages hand work to each other only through these paths: the sanitizer
/// rewrites `manifest_path()`, the synthesizer writes `config_path()`, and the
/// dispatcher passes `config_path()` to the trainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLayout {
    dataset_dir: PathBuf,
    config_path: PathBuf,
    output_dir: PathBuf,
}

impl PipelineLayout {
    /// Relative paths are resolved against the current directory here, so the
    /// trainer sees the same locations whatever its own working directory.
    #[must_use]
    pub fn new(dataset_dir: PathBuf, config_path: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            dataset_dir: absolute(dataset_dir),
            config_path: absolute(config_path),
            output_dir: absolute(output_dir),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            settings.dataset_dir.clone(),
            settings.config_path.clone(),
            settings.output_dir.clone(),
        )
    }

    #[must_use]
    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.dataset_dir.join(MANIFEST_FILE_NAME)
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create the training output directory and the config document's parent.
    ///
    /// Pre-existing directories are not an error.
    pub fn ensure_output_dirs(&self) -> TrainingResult<()> {
        create_dir_all(&self.output_dir)?;
        if let Some(parent) = self.config_path.parent() {
            create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

fn create_dir_all(path: &Path) -> TrainingResult<()> {
    std::fs::create_dir_all(path).map_err(|e| TrainingError::filesystem(path, e))
}

/// Replace `path` with `contents` in one step.
///
/// The bytes go to a temporary file in the same directory which is then
/// renamed over the target, so readers see either the old file or the new
/// one. An existing target's permissions are carried over.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> TrainingResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| TrainingError::filesystem(dir, e))?;
    tmp.write_all(contents).map_err(|e| TrainingError::filesystem(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| TrainingError::filesystem(tmp.path(), e))?;

    if let Ok(existing) = std::fs::metadata(path) {
        tmp.as_file()
            .set_permissions(existing.permissions())
            .map_err(|e| TrainingError::filesystem(path, e))?;
    }

    tmp.persist(path).map_err(|e| TrainingError::filesystem(path, e.error))?;
    Ok(())
}
