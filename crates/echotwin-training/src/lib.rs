//! EchoTwin Training
//!
//! Dataset preparation and job dispatch for fine-tuning a multilingual,
//! multi-speaker voice-cloning model:
//! - Sanitizing the `metadata.csv` manifest against the audio on disk
//! - Probing for accelerated compute
//! - Synthesizing the JSON training config
//! - Launching the external trainer and reporting its outcome

pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod manifest;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod settings;

pub use config::{config_digest, ConfigSynthesizer, TrainingConfig};
pub use dispatch::{JobOutcome, JobRunner, SubprocessTrainer};
pub use error::{TrainingError, TrainingResult};
pub use fetch::{fetch_dataset, ArchiveSource, FetchOutcome};
pub use layout::{PipelineLayout, MANIFEST_FILE_NAME};
pub use manifest::{read_manifest, sanitize_manifest, write_manifest, Manifest, ManifestEntry, SanitizeOptions, SanitizeReport};
pub use pipeline::{Pipeline, PipelineReport, PipelineStage, RunId, StageFailure};
pub use probe::{detect, HardwareCapability, HardwareProbe, NvidiaSmiProbe, ProbeOutcome, StaticProbe, TorchCudaProbe};
pub use progress::{ProgressEvent, ProgressSink, SilentProgressSink, StdoutProgressSink};
pub use settings::{PipelineSettings, ProbeKind, ProbeSettings, TrainerSettings};
