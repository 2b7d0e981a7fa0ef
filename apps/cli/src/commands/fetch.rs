//! Fetch command implementation.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use echotwin_training::{fetch_dataset, ArchiveSource, FetchOutcome, PipelineSettings};

pub async fn execute(settings: &PipelineSettings, archive: Option<String>) -> Result<()> {
    let Some(value) = archive.or_else(|| settings.dataset.archive.clone()) else {
        bail!("No dataset archive configured. Pass --archive or set [dataset] archive in echotwin.toml.");
    };
    let source = ArchiveSource::parse(&value);

    let outcome = fetch_dataset(&source, &settings.dataset_dir)
        .await
        .with_context(|| format!("Failed to fetch dataset from {source}"))?;

    println!();
    match outcome {
        FetchOutcome::Skipped => {
            println!("{}", "Dataset already present".bold().yellow());
            println!("  {}", settings.dataset_dir.display().to_string().dimmed());
        }
        FetchOutcome::Extracted { files } => {
            println!("{}", "Dataset fetched".bold().green());
            println!("  Source: {}", source.to_string().cyan());
            println!("  Files:  {}", files);
            println!("  Into:   {}", settings.dataset_dir.display().to_string().dimmed());
        }
    }
    println!();
    Ok(())
}
