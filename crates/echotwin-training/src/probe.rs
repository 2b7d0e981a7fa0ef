//! Accelerated-compute detection.
//!
//! A probe never fails the pipeline. Anything that prevents a definite answer
//! is reported as [`ProbeOutcome::Inconclusive`], which counts as "no
//! accelerator" but stays distinguishable from a host that has none.

use crate::settings::{ProbeKind, ProbeSettings};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Exits 0 when CUDA devices are visible, 3 when torch reports none. Any other
/// status (e.g. 1 from an ImportError traceback) means the check itself broke.
const TORCH_CUDA_SNIPPET: &str = "import sys, torch\n\
n = torch.cuda.device_count() if torch.cuda.is_available() else 0\n\
print(n)\n\
sys.exit(0 if n > 0 else 3)";

const TORCH_ABSENT_EXIT: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Available { devices: usize },
    Absent,
    Inconclusive { reason: String },
}

impl ProbeOutcome {
    /// The capability flag written into the training config.
    #[must_use]
    pub fn accelerated_compute_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available { devices } => write!(f, "available ({devices} device(s))"),
            Self::Absent => write!(f, "absent"),
            Self::Inconclusive { reason } => write!(f, "inconclusive ({reason})"),
        }
    }
}

/// The single capability bit the training config consumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareCapability {
    pub accelerated_compute_available: bool,
}

impl From<&ProbeOutcome> for HardwareCapability {
    fn from(outcome: &ProbeOutcome) -> Self {
        Self { accelerated_compute_available: outcome.accelerated_compute_available() }
    }
}

#[async_trait]
pub trait HardwareProbe: Send + Sync {
    fn id(&self) -> &'static str;

    async fn probe(&self) -> ProbeOutcome;
}

/// Probe and log the result, warning when the answer is a degradation.
pub async fn detect(probe: &dyn HardwareProbe) -> ProbeOutcome {
    let outcome = probe.probe().await;
    match &outcome {
        ProbeOutcome::Inconclusive { reason } => {
            tracing::warn!("{} probe inconclusive, assuming no accelerator: {}", probe.id(), reason);
        }
        other => tracing::info!("{} probe: accelerated compute {}", probe.id(), other),
    }
    outcome
}

/// Build the probe selected in settings.
#[must_use]
pub fn from_settings(settings: &ProbeSettings) -> Box<dyn HardwareProbe> {
    let timeout = Duration::from_secs(settings.timeout_secs);
    match settings.kind {
        ProbeKind::Torch => Box::new(TorchCudaProbe::new(settings.python.clone(), timeout)),
        ProbeKind::NvidiaSmi => Box::new(NvidiaSmiProbe::new("nvidia-smi", timeout)),
        ProbeKind::ForceOn => Box::new(StaticProbe { available: true }),
        ProbeKind::ForceOff => Box::new(StaticProbe { available: false }),
    }
}

async fn run_bounded(mut cmd: Command, timeout: Duration) -> Result<Output, String> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("failed to run probe command: {e}")),
        Err(_) => Err(format!("probe timed out after {}s", timeout.as_secs())),
    }
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr.trim().lines().last().unwrap_or("no output").to_string()
}

/// Asks the trainer's Python runtime whether torch can see a CUDA device.
#[derive(Debug, Clone)]
pub struct TorchCudaProbe {
    python: String,
    timeout: Duration,
}

impl TorchCudaProbe {
    #[must_use]
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self { python: python.into(), timeout }
    }
}

#[async_trait]
impl HardwareProbe for TorchCudaProbe {
    fn id(&self) -> &'static str {
        "torch"
    }

    async fn probe(&self) -> ProbeOutcome {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-c").arg(TORCH_CUDA_SNIPPET);

        let output = match run_bounded(cmd, self.timeout).await {
            Ok(output) => output,
            Err(reason) => return ProbeOutcome::Inconclusive { reason },
        };

        match output.status.code() {
            Some(0) => {
                let devices = String::from_utf8_lossy(&output.stdout).trim().parse().unwrap_or(1);
                ProbeOutcome::Available { devices }
            }
            Some(TORCH_ABSENT_EXIT) => ProbeOutcome::Absent,
            code => ProbeOutcome::Inconclusive {
                reason: format!("{} exited with {:?}: {}", self.python, code, stderr_tail(&output)),
            },
        }
    }
}

/// Lists GPUs with `nvidia-smi -L`.
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    binary: String,
    timeout: Duration,
}

impl NvidiaSmiProbe {
    #[must_use]
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self { binary: binary.into(), timeout }
    }
}

fn count_gpu_lines(stdout: &str) -> usize {
    stdout.lines().filter(|line| line.trim_start().starts_with("GPU ")).count()
}

#[async_trait]
impl HardwareProbe for NvidiaSmiProbe {
    fn id(&self) -> &'static str {
        "nvidia-smi"
    }

    async fn probe(&self) -> ProbeOutcome {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-L");

        let output = match run_bounded(cmd, self.timeout).await {
            Ok(output) => output,
            Err(reason) => return ProbeOutcome::Inconclusive { reason },
        };

        if !output.status.success() {
            return ProbeOutcome::Inconclusive {
                reason: format!("{} exited with {:?}: {}", self.binary, output.status.code(), stderr_tail(&output)),
            };
        }

        match count_gpu_lines(&String::from_utf8_lossy(&output.stdout)) {
            0 => ProbeOutcome::Absent,
            devices => ProbeOutcome::Available { devices },
        }
    }
}

/// Fixed answer, for hosts where detection is known to be wrong or slow.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    pub available: bool,
}

#[async_trait]
impl HardwareProbe for StaticProbe {
    fn id(&self) -> &'static str {
        "static"
    }

    async fn probe(&self) -> ProbeOutcome {
        if self.available {
            ProbeOutcome::Available { devices: 1 }
        } else {
            ProbeOutcome::Absent
        }
    }
}
