//! Pipeline settings file support.
//!
//! Settings are TOML. Discovery layers the global file
//! (`~/.echotwin/config.toml`) under the local one (`./echotwin.toml`), table
//! by table, and environment variables go on top of both.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DATASET_DIR: &str = "ECHOTWIN_DATASET_DIR";
pub const ENV_CONFIG_PATH: &str = "ECHOTWIN_CONFIG_PATH";
pub const ENV_OUTPUT_DIR: &str = "ECHOTWIN_OUTPUT_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Dataset root holding `metadata.csv` and the audio files.
    pub dataset_dir: PathBuf,
    /// Name recorded for the dataset in the training config.
    pub dataset_name: String,
    /// Where the training config document is written.
    pub config_path: PathBuf,
    /// Training output directory handed to the trainer.
    pub output_dir: PathBuf,
    /// Pretrained model identifier.
    pub model: String,
    pub trainer: TrainerSettings,
    pub probe: ProbeSettings,
    pub dataset: DatasetSettings,
    pub log_level: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("/content/gma_audio_files"),
            dataset_name: "gma_dataset".to_string(),
            config_path: PathBuf::from("/content/yourtts_config.json"),
            output_dir: PathBuf::from("/content/yourtts_output"),
            model: "tts_models/multilingual/multi-dataset/your_tts".to_string(),
            trainer: TrainerSettings::default(),
            probe: ProbeSettings::default(),
            dataset: DatasetSettings::default(),
            log_level: None,
        }
    }
}

/// How the external trainer is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerSettings {
    pub program: String,
    /// Arguments placed before the config flag, e.g. the entry script.
    pub args: Vec<String>,
    pub config_flag: String,
    pub working_dir: Option<PathBuf>,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["TTS/train.py".to_string()],
            config_flag: "--config_path".to_string(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    #[default]
    Torch,
    NvidiaSmi,
    ForceOn,
    ForceOff,
}

impl std::str::FromStr for ProbeKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "torch" => Ok(Self::Torch),
            "nvidia-smi" => Ok(Self::NvidiaSmi),
            "force-on" => Ok(Self::ForceOn),
            "force-off" => Ok(Self::ForceOff),
            other => Err(TrainingError::Settings(format!(
                "unknown probe kind `{other}` (expected torch, nvidia-smi, force-on, force-off)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub kind: ProbeKind,
    /// Interpreter used by the torch probe.
    pub python: String,
    pub timeout_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self { kind: ProbeKind::Torch, python: "python3".to_string(), timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSettings {
    /// Archive to fetch when the dataset directory is empty: a Google Drive
    /// file id, an http(s) URL, or a local zip path.
    pub archive: Option<String>,
}

impl PipelineSettings {
    /// Load a single settings file. The file must exist.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        let table = read_table(path)?;
        from_table(table, path)
    }

    /// Load the global and local settings files, whichever exist.
    pub fn discover_and_load() -> TrainingResult<Self> {
        let mut candidates = Vec::new();
        if let Some(global) = Self::default_global_path() {
            candidates.push(global);
        }
        candidates.push(Self::default_local_path());
        Self::load_layered(&candidates)
    }

    /// Merge existing files from `paths`, later files overriding earlier ones.
    pub fn load_layered(paths: &[PathBuf]) -> TrainingResult<Self> {
        let mut merged = toml::Table::new();
        let mut last = None;
        for path in paths.iter().filter(|p| p.is_file()) {
            tracing::debug!("loading settings from {}", path.display());
            merge_tables(&mut merged, read_table(path)?);
            last = Some(path.as_path());
        }
        from_table(merged, last.unwrap_or_else(|| Path::new("<defaults>")))
    }

    #[must_use]
    pub fn default_global_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".echotwin").join("config.toml"))
    }

    #[must_use]
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("echotwin.toml")
    }

    /// Apply `ECHOTWIN_*` path overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply path overrides from an arbitrary variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        if let Some(dir) = non_empty(ENV_DATASET_DIR) {
            self.dataset_dir = dir;
        }
        if let Some(path) = non_empty(ENV_CONFIG_PATH) {
            self.config_path = path;
        }
        if let Some(dir) = non_empty(ENV_OUTPUT_DIR) {
            self.output_dir = dir;
        }
    }
}

fn read_table(path: &Path) -> TrainingResult<toml::Table> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| TrainingError::Settings(format!("{}: {}", path.display(), e)))?;
    content
        .parse::<toml::Table>()
        .map_err(|e| TrainingError::Settings(format!("{}: {}", path.display(), e)))
}

fn from_table(table: toml::Table, origin: &Path) -> TrainingResult<PipelineSettings> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e| TrainingError::Settings(format!("{}: {}", origin.display(), e)))
}

/// Recursively overlay `overlay` onto `base`; nested tables merge key by key.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let value = match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
                continue;
            }
            (_, value) => value,
        };
        base.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_no_files_exist() {
        let temp = TempDir::new().unwrap();
        let settings = PipelineSettings::load_layered(&[temp.path().join("missing.toml")]).unwrap();
        assert_eq!(settings, PipelineSettings::default());
        assert_eq!(settings.trainer.config_flag, "--config_path");
    }

    #[test]
    fn test_local_overrides_global_per_key() {
        let temp = TempDir::new().unwrap();
        let global = temp.path().join("global.toml");
        let local = temp.path().join("local.toml");
        std::fs::write(
            &global,
            "dataset_dir = \"/data/global\"\n[probe]\nkind = \"nvidia-smi\"\ntimeout_secs = 5\n",
        )
        .unwrap();
        std::fs::write(&local, "[probe]\ntimeout_secs = 10\n").unwrap();

        let settings = PipelineSettings::load_layered(&[global, local]).unwrap();

        assert_eq!(settings.dataset_dir, PathBuf::from("/data/global"));
        assert_eq!(settings.probe.kind, ProbeKind::NvidiaSmi);
        assert_eq!(settings.probe.timeout_secs, 10);
        assert_eq!(settings.probe.python, "python3");
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let temp = TempDir::new().unwrap();
        let err = PipelineSettings::load_from_file(&temp.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, TrainingError::Settings(_)));
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "[probe]\nkind = \"quantum\"\n").unwrap();

        let err = PipelineSettings::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_env_overrides_paths() {
        let mut settings = PipelineSettings::default();
        settings.apply_overrides(|key| match key {
            ENV_DATASET_DIR => Some("/mnt/voices".to_string()),
            ENV_OUTPUT_DIR => Some("  ".to_string()),
            _ => None,
        });

        assert_eq!(settings.dataset_dir, PathBuf::from("/mnt/voices"));
        assert_eq!(settings.output_dir, PipelineSettings::default().output_dir);
    }

    #[test]
    fn test_probe_kind_from_str() {
        assert_eq!("force-off".parse::<ProbeKind>().unwrap(), ProbeKind::ForceOff);
        assert!("gpu".parse::<ProbeKind>().is_err());
    }
}
