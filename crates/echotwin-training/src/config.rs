//! Training config synthesis.
//!
//! The config document is the only thing the external trainer receives, so it
//! has to describe the whole run on its own. It is rebuilt from scratch on
//! every pipeline run and replaces any previous document wholesale.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::{write_atomic, PipelineLayout};
use crate::probe::HardwareCapability;
use crate::settings::PipelineSettings;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const DEFAULT_DATASET_NAME: &str = "gma_dataset";
pub const DEFAULT_MODEL: &str = "tts_models/multilingual/multi-dataset/your_tts";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub output_path: PathBuf,
    pub datasets: Vec<DatasetDescriptor>,
    pub model: String,
    pub trainer: TrainerParams,
    pub audio: AudioParams,
    pub use_speaker_embedding: bool,
    pub use_cuda: bool,
    pub multi_speaker: bool,
    pub multi_lingual: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerParams {
    pub epochs: u32,
    pub batch_size: u32,
    pub eval_batch_size: u32,
    pub lr: f64,
    pub optimizer: String,
    pub loss: String,
    pub run_eval: bool,
    /// Epochs to wait before the first evaluation.
    pub test_delay_epochs: u32,
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 16,
            eval_batch_size: 8,
            lr: 1e-4,
            optimizer: "adam".to_string(),
            loss: "Tacotron2Loss".to_string(),
            run_eval: true,
            test_delay_epochs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub win_length: u32,
    pub hop_length: u32,
    pub fft_size: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self { sample_rate: 22050, win_length: 1024, hop_length: 256, fft_size: 1024 }
    }
}

impl TrainingConfig {
    /// Read a persisted config document.
    pub fn load(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| TrainingError::filesystem(path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Persist as 2-space indented JSON, replacing `path` atomically.
    pub fn save(&self, path: &Path) -> TrainingResult<()> {
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        write_atomic(path, &json)
    }
}

/// SHA-256 of a persisted config document, hex encoded.
pub fn config_digest(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path).map_err(|e| TrainingError::filesystem(path, e))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Builds the training config from fixed hyperparameters, the pipeline
/// layout and the detected hardware capability.
#[derive(Debug, Clone)]
pub struct ConfigSynthesizer {
    dataset_name: String,
    model: String,
}

impl Default for ConfigSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_DATASET_NAME, DEFAULT_MODEL)
    }
}

impl ConfigSynthesizer {
    #[must_use]
    pub fn new(dataset_name: impl Into<String>, model: impl Into<String>) -> Self {
        Self { dataset_name: dataset_name.into(), model: model.into() }
    }

    #[must_use]
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(settings.dataset_name.clone(), settings.model.clone())
    }

    #[must_use]
    pub fn build(&self, layout: &PipelineLayout, capability: HardwareCapability) -> TrainingConfig {
        TrainingConfig {
            output_path: layout.output_dir().to_path_buf(),
            datasets: vec![DatasetDescriptor {
                name: self.dataset_name.clone(),
                path: layout.dataset_dir().to_path_buf(),
            }],
            model: self.model.clone(),
            trainer: TrainerParams::default(),
            audio: AudioParams::default(),
            use_speaker_embedding: true,
            use_cuda: capability.accelerated_compute_available,
            multi_speaker: true,
            multi_lingual: true,
        }
    }

    /// Create the output directories, then build and write the config to
    /// `layout.config_path()`.
    pub fn synthesize(
        &self,
        layout: &PipelineLayout,
        capability: HardwareCapability,
    ) -> TrainingResult<TrainingConfig> {
        layout.ensure_output_dirs()?;

        let config = self.build(layout, capability);
        config.save(layout.config_path())?;

        tracing::info!(
            "wrote training config to {} (use_cuda={})",
            layout.config_path().display(),
            config.use_cuda
        );
        Ok(config)
    }
}
