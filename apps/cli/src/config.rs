//! CLI settings loading and merging.

use anyhow::{Context, Result};
use echotwin_training::PipelineSettings;
use std::path::{Path, PathBuf};

/// Path flags given on the command line.
#[derive(Debug, Default)]
pub struct PathOverrides {
    pub dataset_dir: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Load pipeline settings.
///
/// Precedence:
/// 1. CLI arguments (applied by [`apply_overrides`])
/// 2. Environment variables (ECHOTWIN_DATASET_DIR, ECHOTWIN_CONFIG_PATH, ECHOTWIN_OUTPUT_DIR)
/// 3. Local settings file (./echotwin.toml)
/// 4. Global settings file (~/.echotwin/config.toml)
/// 5. Defaults
///
/// An explicit `--settings` file replaces 3 and 4 and must exist.
pub fn load_settings(explicit: Option<&Path>) -> Result<PipelineSettings> {
    let mut settings = match explicit {
        Some(path) => PipelineSettings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => PipelineSettings::discover_and_load().context("Failed to load settings")?,
    };
    settings.apply_env();
    Ok(settings)
}

pub fn apply_overrides(settings: &mut PipelineSettings, overrides: PathOverrides) {
    if let Some(dir) = overrides.dataset_dir {
        settings.dataset_dir = dir;
    }
    if let Some(path) = overrides.config_path {
        settings.config_path = path;
    }
    if let Some(dir) = overrides.output_dir {
        settings.output_dir = dir;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_settings() {
        let mut settings = PipelineSettings::default();
        apply_overrides(
            &mut settings,
            PathOverrides { dataset_dir: Some(PathBuf::from("/data/voices")), ..PathOverrides::default() },
        );

        assert_eq!(settings.dataset_dir, PathBuf::from("/data/voices"));
        assert_eq!(settings.config_path, PipelineSettings::default().config_path);
    }

    #[test]
    fn test_missing_explicit_settings_is_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = load_settings(Some(&temp.path().join("absent.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("absent.toml"));
    }
}
