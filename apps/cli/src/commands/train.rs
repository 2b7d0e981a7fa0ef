//! Train command implementation.

use anyhow::Result;
use colored::Colorize;
use echotwin_training::{
    Pipeline, PipelineReport, PipelineSettings, ProgressSink, SanitizeOptions, SilentProgressSink,
    StdoutProgressSink, SubprocessTrainer,
};
use serde_json::json;

#[derive(Debug, Clone, Copy, Default)]
pub struct TrainOptions {
    pub skip_fetch: bool,
    pub dry_run: bool,
    pub backup: bool,
    pub json: bool,
}

pub async fn execute(settings: &PipelineSettings, options: TrainOptions) -> Result<()> {
    // In JSON mode stdout carries only the report
    let trainer = SubprocessTrainer::from_settings(&settings.trainer).with_stdout_to_stderr(options.json);
    let mut pipeline = Pipeline::from_settings(settings)
        .with_runner(Box::new(trainer))
        .with_sanitize_options(SanitizeOptions { keep_backup: options.backup })
        .dry_run(options.dry_run);
    if options.skip_fetch {
        pipeline = pipeline.with_archive(None);
    }

    let sink: &dyn ProgressSink = if options.json { &SilentProgressSink } else { &StdoutProgressSink };

    match pipeline.run(sink).await {
        Ok(report) => {
            if options.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report);
            }
            Ok(())
        }
        Err(failure) => {
            if options.json {
                let out = json!({
                    "run_id": failure.run_id,
                    "stage": failure.stage,
                    "error": failure.error.to_string(),
                    "exit_code": failure.error.job_exit_code(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            Err(failure.into())
        }
    }
}

fn print_summary(report: &PipelineReport) {
    println!();
    println!("{}", "Pipeline complete".bold().green());
    println!("  Run:      {}", report.run_id.to_string().cyan());
    println!("  Manifest: {} of {} rows kept", report.sanitize.kept, report.sanitize.total);
    println!("  Probe:    {}", report.probe);
    println!("  Config:   {}", report.config_path.display().to_string().dimmed());
    match report.outcome {
        Some(outcome) => println!("  Trainer:  {}", outcome.to_string().green()),
        None => println!("  Trainer:  {}", "not dispatched (dry run)".yellow()),
    }
    println!();
}
