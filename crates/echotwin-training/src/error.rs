use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    /// The manifest is missing or cannot be parsed.
    #[error("manifest error at {}: {reason}", path.display())]
    ManifestParse { path: PathBuf, reason: String },

    /// A directory or document could not be created or written.
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external trainer terminated unsuccessfully.
    #[error("training job failed ({})", describe_exit(*code))]
    JobFailure { code: Option<i32> },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset fetch error: {0}")]
    Fetch(String),

    #[error("settings error: {0}")]
    Settings(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl TrainingError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem { path: path.into(), source }
    }

    pub(crate) fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ManifestParse { path: path.into(), reason: reason.into() }
    }

    /// Exit code of a failed training job, if the trainer reported one.
    #[must_use]
    pub fn job_exit_code(&self) -> Option<i32> {
        match self {
            Self::JobFailure { code } => *code,
            _ => None,
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}
