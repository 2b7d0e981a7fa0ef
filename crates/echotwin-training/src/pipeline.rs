//! Pipeline orchestration: sanitize the manifest, synthesize the config,
//! dispatch the trainer.
//!
//! Stages run strictly in order and hand off only through files. The first
//! stage that fails ends the run in [`PipelineStage::Failed`]; nothing is
//! retried or rolled back, so a failed run is simply invoked again.

use crate::config::{config_digest, ConfigSynthesizer};
use crate::dispatch::{JobOutcome, JobRunner, SubprocessTrainer};
use crate::error::TrainingError;
use crate::fetch::{fetch_dataset, ArchiveSource, FetchOutcome};
use crate::layout::PipelineLayout;
use crate::manifest::{sanitize_manifest, SanitizeOptions, SanitizeReport};
use crate::probe::{self, HardwareCapability, HardwareProbe, ProbeOutcome};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::settings::PipelineSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Identifier for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    /// Optional archive retrieval ahead of sanitizing. Never fails the run.
    Fetching,
    Sanitizing,
    Configuring,
    Dispatching,
    Done,
    Failed,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fetching => "FETCHING",
            Self::Sanitizing => "SANITIZING",
            Self::Configuring => "CONFIGURING",
            Self::Dispatching => "DISPATCHING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// The stage that halted a run and why.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct StageFailure {
    pub run_id: RunId,
    pub stage: PipelineStage,
    pub error: TrainingError,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stage: PipelineStage,
    pub fetch: Option<FetchOutcome>,
    pub sanitize: SanitizeReport,
    pub probe: ProbeOutcome,
    pub config_path: PathBuf,
    pub config_sha256: String,
    /// `None` for dry runs, which stop before dispatching.
    pub outcome: Option<JobOutcome>,
}

/// Tracks the current stage and mirrors transitions to the progress sink.
struct StageTracker<'a> {
    run_id: RunId,
    stage: Option<PipelineStage>,
    progress: &'a dyn ProgressSink,
}

impl<'a> StageTracker<'a> {
    fn new(progress: &'a dyn ProgressSink) -> Self {
        Self { run_id: RunId::new(), stage: None, progress }
    }

    fn enter(&mut self, next: PipelineStage) {
        if let Some(previous) = self.stage.replace(next) {
            self.progress.on_event(ProgressEvent::StageFinished { run_id: self.run_id.clone(), stage: previous });
        }
        tracing::debug!("run {} entering {}", self.run_id, next);
        let event = if next == PipelineStage::Done {
            ProgressEvent::Finished { run_id: self.run_id.clone() }
        } else {
            ProgressEvent::StageStarted { run_id: self.run_id.clone(), stage: next }
        };
        self.progress.on_event(event);
    }

    fn message(&self, message: impl Into<String>) {
        self.progress.on_event(ProgressEvent::Message { run_id: self.run_id.clone(), message: message.into() });
    }

    fn fail(&mut self, error: TrainingError) -> StageFailure {
        let stage = self.stage.replace(PipelineStage::Failed).unwrap_or(PipelineStage::Sanitizing);
        tracing::error!("run {} failed during {}: {}", self.run_id, stage, error);
        self.progress.on_event(ProgressEvent::Failed {
            run_id: self.run_id.clone(),
            stage,
            error: error.to_string(),
        });
        StageFailure { run_id: self.run_id.clone(), stage, error }
    }
}

pub struct Pipeline {
    layout: PipelineLayout,
    synthesizer: ConfigSynthesizer,
    probe: Box<dyn HardwareProbe>,
    runner: Box<dyn JobRunner>,
    sanitize: SanitizeOptions,
    archive: Option<ArchiveSource>,
    dry_run: bool,
}

impl Pipeline {
    #[must_use]
    pub fn new(layout: PipelineLayout, probe: Box<dyn HardwareProbe>, runner: Box<dyn JobRunner>) -> Self {
        Self {
            layout,
            synthesizer: ConfigSynthesizer::default(),
            probe,
            runner,
            sanitize: SanitizeOptions::default(),
            archive: None,
            dry_run: false,
        }
    }

    /// Wire up the probe, trainer, layout and archive source from settings.
    #[must_use]
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(
            PipelineLayout::from_settings(settings),
            probe::from_settings(&settings.probe),
            Box::new(SubprocessTrainer::from_settings(&settings.trainer)),
        )
        .with_synthesizer(ConfigSynthesizer::from_settings(settings))
        .with_archive(settings.dataset.archive.as_deref().map(ArchiveSource::parse))
    }

    #[must_use]
    pub fn with_synthesizer(mut self, synthesizer: ConfigSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    #[must_use]
    pub fn with_sanitize_options(mut self, options: SanitizeOptions) -> Self {
        self.sanitize = options;
        self
    }

    #[must_use]
    pub fn with_archive(mut self, archive: Option<ArchiveSource>) -> Self {
        self.archive = archive;
        self
    }

    /// Stop after CONFIGURING without launching the trainer.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Replace the job runner, e.g. to adjust how the trainer is launched.
    #[must_use]
    pub fn with_runner(mut self, runner: Box<dyn JobRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub async fn run(&self, progress: &dyn ProgressSink) -> Result<PipelineReport, StageFailure> {
        let mut tracker = StageTracker::new(progress);
        let started_at = Utc::now();
        tracing::info!("pipeline run {} started", tracker.run_id);

        let fetch = match &self.archive {
            Some(source) => {
                tracker.enter(PipelineStage::Fetching);
                match fetch_dataset(source, self.layout.dataset_dir()).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        tracing::warn!("dataset fetch failed, continuing with what is on disk: {}", e);
                        tracker.message(format!("dataset fetch failed: {e}"));
                        None
                    }
                }
            }
            None => None,
        };

        tracker.enter(PipelineStage::Sanitizing);
        let sanitize = sanitize_manifest(self.layout.dataset_dir(), &self.sanitize).map_err(|e| tracker.fail(e))?;
        tracker.message(format!(
            "manifest: kept {} of {} rows ({} missing audio, {} empty transcript)",
            sanitize.kept, sanitize.total, sanitize.missing_audio, sanitize.empty_transcript
        ));

        tracker.enter(PipelineStage::Configuring);
        let probe = probe::detect(self.probe.as_ref()).await;
        let config = self
            .synthesizer
            .synthesize(&self.layout, HardwareCapability::from(&probe))
            .map_err(|e| tracker.fail(e))?;
        let config_sha256 = config_digest(self.layout.config_path()).map_err(|e| tracker.fail(e))?;
        tracker.message(format!(
            "config: {} (use_cuda={}, accelerator {})",
            self.layout.config_path().display(),
            config.use_cuda,
            probe
        ));

        let outcome = if self.dry_run {
            tracker.message("dry run: trainer not dispatched");
            None
        } else {
            tracker.enter(PipelineStage::Dispatching);
            tracker.message(format!("launching {} trainer", self.runner.id()));
            let outcome = self.runner.run(self.layout.config_path()).await.map_err(|e| tracker.fail(e))?;
            outcome.into_result().map_err(|e| tracker.fail(e))?;
            Some(outcome)
        };

        tracker.enter(PipelineStage::Done);
        tracing::info!("pipeline run {} finished", tracker.run_id);

        Ok(PipelineReport {
            run_id: tracker.run_id,
            started_at,
            finished_at: Utc::now(),
            stage: PipelineStage::Done,
            fetch,
            sanitize,
            probe,
            config_path: self.layout.config_path().to_path_buf(),
            config_sha256,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use crate::error::TrainingResult;
    use crate::layout::MANIFEST_FILE_NAME;
    use crate::probe::{StaticProbe, TorchCudaProbe};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records dispatches and checks the config is on disk when called.
    struct FakeRunner {
        outcome: JobOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobRunner for FakeRunner {
        fn id(&self) -> &'static str {
            "fake"
        }

        async fn run(&self, config_path: &Path) -> TrainingResult<JobOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            TrainingConfig::load(config_path)?;
            Ok(self.outcome)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingSink {
        fn started_stages(&self) -> Vec<PipelineStage> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ProgressEvent::StageStarted { stage, .. } => Some(*stage),
                    _ => None,
                })
                .collect()
        }
    }

    impl ProgressSink for RecordingSink {
        fn on_event(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn dataset(temp: &TempDir) -> PipelineLayout {
        let root = temp.path().join("voices");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.wav"), b"RIFF").unwrap();
        std::fs::write(root.join("c.wav"), b"RIFF").unwrap();
        std::fs::write(
            root.join(MANIFEST_FILE_NAME),
            "a.wav|Hola, ¿qué tal?\nb.wav|missing audio\nc.wav|Good morning.\n",
        )
        .unwrap();
        PipelineLayout::new(root, temp.path().join("run/config.json"), temp.path().join("run/output"))
    }

    fn pipeline(layout: PipelineLayout, probe: Box<dyn HardwareProbe>, outcome: JobOutcome) -> (Pipeline, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = FakeRunner { outcome, calls: calls.clone() };
        (Pipeline::new(layout, probe, Box::new(runner)), calls)
    }

    #[tokio::test]
    async fn test_successful_run_goes_through_every_stage() {
        let temp = TempDir::new().unwrap();
        let (pipeline, calls) = pipeline(dataset(&temp), Box::new(StaticProbe { available: true }), JobOutcome::Success);
        let sink = RecordingSink::default();

        let report = pipeline.run(&sink).await.unwrap();

        assert_eq!(report.stage, PipelineStage::Done);
        assert_eq!(report.outcome, Some(JobOutcome::Success));
        assert_eq!(report.sanitize.kept, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            sink.started_stages(),
            vec![PipelineStage::Sanitizing, PipelineStage::Configuring, PipelineStage::Dispatching]
        );
        let launched = sink.events.lock().unwrap().iter().any(|e| {
            matches!(e, ProgressEvent::Message { message, .. } if message == "launching fake trainer")
        });
        assert!(launched);
        let config = TrainingConfig::load(&report.config_path).unwrap();
        assert!(config.use_cuda);
        assert_eq!(report.config_sha256, config_digest(&report.config_path).unwrap());
    }

    #[tokio::test]
    async fn test_trainer_failure_is_job_failure_without_retry() {
        let temp = TempDir::new().unwrap();
        let (pipeline, calls) = pipeline(
            dataset(&temp),
            Box::new(StaticProbe { available: false }),
            JobOutcome::Failure { code: Some(1) },
        );

        let failure = pipeline.run(&RecordingSink::default()).await.unwrap_err();

        assert_eq!(failure.stage, PipelineStage::Dispatching);
        assert!(matches!(failure.error, TrainingError::JobFailure { code: Some(1) }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inconclusive_probe_still_configures_and_dispatches() {
        let temp = TempDir::new().unwrap();
        let probe = TorchCudaProbe::new("/nonexistent/echotwin-python", Duration::from_secs(5));
        let (pipeline, calls) = pipeline(dataset(&temp), Box::new(probe), JobOutcome::Success);

        let report = pipeline.run(&RecordingSink::default()).await.unwrap();

        assert!(matches!(report.probe, ProbeOutcome::Inconclusive { .. }));
        assert!(!TrainingConfig::load(&report.config_path).unwrap().use_cuda);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_manifest_halts_before_configuring() {
        let temp = TempDir::new().unwrap();
        let layout = PipelineLayout::new(
            temp.path().join("empty"),
            temp.path().join("config.json"),
            temp.path().join("output"),
        );
        let (pipeline, calls) = pipeline(layout.clone(), Box::new(StaticProbe { available: true }), JobOutcome::Success);
        let sink = RecordingSink::default();

        let failure = pipeline.run(&sink).await.unwrap_err();

        assert_eq!(failure.stage, PipelineStage::Sanitizing);
        assert!(matches!(failure.error, TrainingError::ManifestParse { .. }));
        assert!(!layout.config_path().exists());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.started_stages(), vec![PipelineStage::Sanitizing]);
    }

    #[tokio::test]
    async fn test_unwritable_output_halts_in_configuring() {
        let temp = TempDir::new().unwrap();
        let layout = dataset(&temp);
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let layout = PipelineLayout::new(layout.dataset_dir().to_path_buf(), blocker.join("config.json"), temp.path().join("out"));
        let (pipeline, calls) = pipeline(layout, Box::new(StaticProbe { available: true }), JobOutcome::Success);

        let failure = pipeline.run(&RecordingSink::default()).await.unwrap_err();

        assert_eq!(failure.stage, PipelineStage::Configuring);
        assert!(matches!(failure.error, TrainingError::Filesystem { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dry_run_skips_dispatch() {
        let temp = TempDir::new().unwrap();
        let (pipeline, calls) = pipeline(dataset(&temp), Box::new(StaticProbe { available: false }), JobOutcome::Success);

        let report = pipeline.dry_run(true).run(&RecordingSink::default()).await.unwrap();

        assert_eq!(report.outcome, None);
        assert!(report.config_path.is_file());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let layout = dataset(&temp);
        let (pipeline, _) = pipeline(layout.clone(), Box::new(StaticProbe { available: false }), JobOutcome::Success);

        let first = pipeline.run(&RecordingSink::default()).await.unwrap();
        let manifest = std::fs::read_to_string(layout.manifest_path()).unwrap();
        let second = pipeline.run(&RecordingSink::default()).await.unwrap();

        assert_eq!(std::fs::read_to_string(layout.manifest_path()).unwrap(), manifest);
        assert_eq!(second.sanitize.dropped(), 0);
        assert_eq!(first.config_sha256, second.config_sha256);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_populated_dataset_skips_fetch() {
        let temp = TempDir::new().unwrap();
        let layout = dataset(&temp);
        let (pipeline, calls) = pipeline(layout, Box::new(StaticProbe { available: false }), JobOutcome::Success);
        let pipeline = pipeline.with_archive(Some(ArchiveSource::Local(temp.path().join("absent.zip"))));
        let sink = RecordingSink::default();

        let report = pipeline.run(&sink).await.unwrap();

        assert_eq!(report.fetch, Some(FetchOutcome::Skipped));
        assert_eq!(sink.started_stages()[0], PipelineStage::Fetching);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_falls_through_to_sanitizing() {
        let temp = TempDir::new().unwrap();
        let layout = PipelineLayout::new(
            temp.path().join("voices"),
            temp.path().join("config.json"),
            temp.path().join("output"),
        );
        let (pipeline, calls) = pipeline(layout, Box::new(StaticProbe { available: false }), JobOutcome::Success);
        let pipeline = pipeline.with_archive(Some(ArchiveSource::Local(temp.path().join("absent.zip"))));

        let failure = pipeline.run(&RecordingSink::default()).await.unwrap_err();

        assert_eq!(failure.stage, PipelineStage::Sanitizing);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    fn relative_to_cwd(path: &Path) -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        let mut relative = PathBuf::new();
        for _ in cwd.components().skip(1) {
            relative.push("..");
        }
        relative.join(path.strip_prefix("/").unwrap())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relative_paths_reach_trainer_in_other_working_dir() {
        let temp = TempDir::new().unwrap();
        let absolute = dataset(&temp);
        let trainer_home = temp.path().join("trainer_home");
        std::fs::create_dir_all(&trainer_home).unwrap();
        let layout = PipelineLayout::new(
            relative_to_cwd(absolute.dataset_dir()),
            relative_to_cwd(&temp.path().join("run/config.json")),
            relative_to_cwd(&temp.path().join("run/output")),
        );
        let trainer = SubprocessTrainer::new(
            "sh",
            vec!["-c".to_string(), r#"[ -f "$2" ]"#.to_string(), "trainer".to_string()],
            "--config_path",
        )
        .with_working_dir(&trainer_home);
        let pipeline = Pipeline::new(layout, Box::new(StaticProbe { available: false }), Box::new(trainer));

        let report = pipeline.run(&RecordingSink::default()).await.unwrap();

        assert_eq!(report.outcome, Some(JobOutcome::Success));
        let config = TrainingConfig::load(&report.config_path).unwrap();
        assert!(config.output_path.is_absolute());
        assert!(config.datasets[0].path.is_absolute());
    }
}
