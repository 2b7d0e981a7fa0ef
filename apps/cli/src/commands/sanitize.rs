//! Sanitize command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use echotwin_training::{sanitize_manifest, PipelineSettings, SanitizeOptions};

pub fn execute(settings: &PipelineSettings, backup: bool, json_output: bool) -> Result<()> {
    let report = sanitize_manifest(&settings.dataset_dir, &SanitizeOptions { keep_backup: backup })
        .context("Failed to sanitize manifest")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("{}", "Manifest sanitized".bold().green());
    println!("  Rows:  {}", report.total);
    println!("  Kept:  {}", report.kept.to_string().cyan());
    println!("  Dropped: {} missing audio, {} empty transcript", report.missing_audio, report.empty_transcript);
    println!();
    Ok(())
}
