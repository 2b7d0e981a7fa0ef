//! Show-config command implementation.

use anyhow::{Context, Result};
use echotwin_training::{PipelineSettings, TrainingConfig};

pub fn execute(settings: &PipelineSettings, path_only: bool) -> Result<()> {
    if path_only {
        println!("{}", settings.config_path.display());
        return Ok(());
    }

    let config = TrainingConfig::load(&settings.config_path).with_context(|| {
        format!("No training config at {}. Run `echotwin configure` first.", settings.config_path.display())
    })?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
