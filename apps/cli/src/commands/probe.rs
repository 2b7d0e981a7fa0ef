//! Probe command implementation.

use anyhow::Result;
use colored::Colorize;
use echotwin_training::{probe, PipelineSettings, ProbeOutcome};

pub async fn execute(settings: &PipelineSettings, json_output: bool) -> Result<()> {
    let prober = probe::from_settings(&settings.probe);
    let outcome = probe::detect(prober.as_ref()).await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!();
    let line = match &outcome {
        ProbeOutcome::Available { .. } => outcome.to_string().green(),
        ProbeOutcome::Absent => outcome.to_string().yellow(),
        ProbeOutcome::Inconclusive { .. } => outcome.to_string().red(),
    };
    println!("  {} {}", format!("[{}]", prober.id()).dimmed(), line);
    println!("  use_cuda = {}", outcome.accelerated_compute_available());
    println!();
    Ok(())
}
