//! Configure command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use echotwin_training::{config_digest, probe, ConfigSynthesizer, HardwareCapability, PipelineLayout, PipelineSettings};
use serde_json::json;

pub async fn execute(settings: &PipelineSettings, json_output: bool) -> Result<()> {
    let layout = PipelineLayout::from_settings(settings);
    let prober = probe::from_settings(&settings.probe);
    let outcome = probe::detect(prober.as_ref()).await;

    let config = ConfigSynthesizer::from_settings(settings)
        .synthesize(&layout, HardwareCapability::from(&outcome))
        .context("Failed to write training config")?;
    let digest = config_digest(layout.config_path())?;

    if json_output {
        let out = json!({
            "config_path": layout.config_path(),
            "config_sha256": digest,
            "use_cuda": config.use_cuda,
            "probe": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Training config written".bold().green());
    println!("  Path:     {}", layout.config_path().display().to_string().cyan());
    println!("  use_cuda: {} ({})", config.use_cuda, outcome);
    println!("  sha256:   {}", digest.dimmed());
    println!();
    Ok(())
}
