//! Launching the external trainer.

use crate::error::{TrainingError, TrainingResult};
use crate::settings::TrainerSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// How the trainer process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    /// Non-zero exit. `code` is `None` when the process was killed by a signal.
    Failure { code: Option<i32> },
}

impl JobOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Turn a failed outcome into [`TrainingError::JobFailure`].
    pub fn into_result(self) -> TrainingResult<()> {
        match self {
            Self::Success => Ok(()),
            Self::Failure { code } => Err(TrainingError::JobFailure { code }),
        }
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "exit code 0"),
            Self::Failure { code: Some(code) } => write!(f, "exit code {code}"),
            Self::Failure { code: None } => write!(f, "terminated by signal"),
        }
    }
}

/// Runs one training job against a persisted config document.
#[async_trait]
pub trait JobRunner: Send + Sync {
    fn id(&self) -> &'static str;

    /// Block until the job finishes. `Err` means the job could not be started.
    async fn run(&self, config_path: &Path) -> TrainingResult<JobOutcome>;
}

/// Spawns `<program> <args...> <config_flag> <config_path>` and waits for it.
///
/// The trainer's stdout and stderr are inherited; logs and checkpoints belong
/// to the trainer. Its stdout can be folded into stderr when the caller's own
/// stdout carries machine-readable output.
#[derive(Debug, Clone)]
pub struct SubprocessTrainer {
    program: String,
    args: Vec<String>,
    config_flag: String,
    working_dir: Option<PathBuf>,
    stdout_to_stderr: bool,
}

impl SubprocessTrainer {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, config_flag: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            config_flag: config_flag.into(),
            working_dir: None,
            stdout_to_stderr: false,
        }
    }

    #[must_use]
    pub fn with_stdout_to_stderr(mut self, enabled: bool) -> Self {
        self.stdout_to_stderr = enabled;
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn from_settings(settings: &TrainerSettings) -> Self {
        let trainer = Self::new(settings.program.clone(), settings.args.clone(), settings.config_flag.clone());
        match &settings.working_dir {
            Some(dir) => trainer.with_working_dir(dir),
            None => trainer,
        }
    }

    fn command_line(&self, config_path: &Path) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(self.config_flag.clone());
        args.push(config_path.display().to_string());
        args
    }
}

#[async_trait]
impl JobRunner for SubprocessTrainer {
    fn id(&self) -> &'static str {
        "subprocess"
    }

    async fn run(&self, config_path: &Path) -> TrainingResult<JobOutcome> {
        let args = self.command_line(config_path);
        tracing::info!("dispatching {} trainer: {} {}", self.id(), self.program, args.join(" "));

        let stdout = if self.stdout_to_stderr { Stdio::from(std::io::stderr()) } else { Stdio::inherit() };
        let mut cmd = Command::new(&self.program);
        cmd.args(&args).stdin(Stdio::null()).stdout(stdout).stderr(Stdio::inherit());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let status = cmd
            .status()
            .await
            .map_err(|source| TrainingError::Spawn { program: self.program.clone(), source })?;

        let outcome = if status.success() {
            JobOutcome::Success
        } else {
            JobOutcome::Failure { code: status.code() }
        };
        tracing::info!("trainer finished: {}", outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn shell(script: &str) -> SubprocessTrainer {
        SubprocessTrainer::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "trainer".to_string()],
            "--config_path",
        )
    }

    #[test]
    fn test_failure_converts_to_job_failure() {
        let err = JobOutcome::Failure { code: Some(2) }.into_result().unwrap_err();
        assert!(matches!(err, TrainingError::JobFailure { code: Some(2) }));
        assert!(JobOutcome::Success.into_result().is_ok());
    }

    #[test]
    fn test_command_line_ends_with_config_flag() {
        let trainer = SubprocessTrainer::from_settings(&TrainerSettings::default());
        let args = trainer.command_line(Path::new("/content/yourtts_config.json"));
        assert_eq!(args, vec!["TTS/train.py", "--config_path", "/content/yourtts_config.json"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_zero_is_success() {
        let outcome = shell("exit 0").run(Path::new("cfg.json")).await.unwrap();
        assert_eq!(outcome, JobOutcome::Success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_code() {
        let outcome = shell("exit 1").run(Path::new("cfg.json")).await.unwrap();
        assert_eq!(outcome, JobOutcome::Failure { code: Some(1) });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_config_path_is_passed_as_named_argument() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = temp.path().join("config.json");
        std::fs::write(&config, "{}").unwrap();

        let outcome = shell(r#"[ "$1" = "--config_path" ] && [ -f "$2" ]"#).run(&config).await.unwrap();

        assert!(outcome.is_success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_killed_trainer_is_failure_without_code() {
        let outcome = shell("kill -9 $$").run(Path::new("cfg.json")).await.unwrap();
        assert_eq!(outcome, JobOutcome::Failure { code: None });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_working_dir_is_applied() {
        let temp = tempfile::TempDir::new().unwrap();
        let trainer = shell("[ -f marker ]").with_working_dir(temp.path());
        std::fs::write(temp.path().join("marker"), b"").unwrap();

        assert!(trainer.run(Path::new("cfg.json")).await.unwrap().is_success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_folded_into_stderr_still_reports_exit() {
        let trainer = shell("echo epoch 1; exit 4").with_stdout_to_stderr(true);

        let outcome = trainer.run(Path::new("cfg.json")).await.unwrap();

        assert_eq!(outcome, JobOutcome::Failure { code: Some(4) });
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let trainer = SubprocessTrainer::new("/nonexistent/echotwin-train", Vec::new(), "--config_path");
        let err = trainer.run(Path::new("cfg.json")).await.unwrap_err();
        assert!(matches!(err, TrainingError::Spawn { .. }));
    }
}
