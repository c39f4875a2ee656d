//! Configuration structures for a Wan2.2 image-to-video job
//!
//! A [`JobConfig`] groups one record per pipeline call:
//!
//! ```text
//! PipelineSpec    → construct
//! QuantizeConfig  → enable_quantize   (optional)
//! OffloadConfig   → enable_offload    (optional)
//! GeneratorConfig → create_generator
//! GenerateRequest → generate
//! ```
//!
//! Job files are plain JSON and load with [`load_job_config`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// =============================================================================
// Enumerations
// =============================================================================

/// Generation task understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Image-to-video
    I2v,
    /// Text-to-video
    T2v,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::I2v => "i2v",
            Task::T2v => "t2v",
        }
    }

    /// Whether this task conditions on an input image
    pub fn needs_image(&self) -> bool {
        matches!(self, Task::I2v)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How CPU offloading is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffloadGranularity {
    /// Swap weights per inference phase (used by the Wan2.2 MoE models)
    Phase,
    /// Swap whole models in and out
    Model,
}

impl OffloadGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffloadGranularity::Phase => "phase",
            OffloadGranularity::Model => "model",
        }
    }
}

impl fmt::Display for OffloadGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attention kernel used by the generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttnMode {
    TorchSdpa,
    FlashAttn2,
    FlashAttn3,
    SageAttn2,
}

impl AttnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttnMode::TorchSdpa => "torch_sdpa",
            AttnMode::FlashAttn2 => "flash_attn2",
            AttnMode::FlashAttn3 => "flash_attn3",
            AttnMode::SageAttn2 => "sage_attn2",
        }
    }
}

impl fmt::Display for AttnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Per-call records
// =============================================================================

/// Arguments for constructing the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Model root directory
    pub model_path: PathBuf,
    /// Model class identifier, e.g. `wan2.2_moe_distill`
    pub model_cls: String,
    pub task: Task,
    /// Unquantized low-noise expert checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_noise_original_ckpt: Option<PathBuf>,
    /// Unquantized high-noise expert checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_noise_original_ckpt: Option<PathBuf>,
    /// T5 text encoder checkpoint (when outside the standard layout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t5_original_ckpt: Option<PathBuf>,
    /// CLIP image encoder checkpoint (when outside the standard layout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_original_ckpt: Option<PathBuf>,
}

/// Arguments for `enable_quantize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizeConfig {
    pub dit_quantized: bool,
    /// Scheme identifier, e.g. `fp8-triton`
    pub quant_scheme: String,
    pub high_noise_quantized_ckpt: PathBuf,
    pub low_noise_quantized_ckpt: PathBuf,
}

/// Arguments for `enable_offload`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffloadConfig {
    pub cpu_offload: bool,
    pub offload_granularity: OffloadGranularity,
    #[serde(default)]
    pub text_encoder_offload: bool,
    #[serde(default)]
    pub image_encoder_offload: bool,
    #[serde(default)]
    pub vae_offload: bool,
}

/// Arguments for `create_generator`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub attn_mode: AttnMode,
    /// Number of denoising steps (4 for distilled models)
    pub infer_steps: usize,
    /// Video height (must be a multiple of 16)
    pub height: usize,
    /// Video width (must be a multiple of 16)
    pub width: usize,
    /// Number of frames (must be 4N+1)
    pub num_frames: usize,
    /// Classifier-free guidance scale; 1.0 disables CFG
    pub guidance_scale: f64,
    /// Flow-matching timestep shift
    pub sample_shift: f64,
}

impl GeneratorConfig {
    /// Check the generator parameters against the Wan VAE geometry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.infer_steps == 0 {
            return Err(ConfigError::InvalidSteps(self.infer_steps));
        }

        if self.height == 0
            || self.width == 0
            || self.height % SPATIAL_ALIGN != 0
            || self.width % SPATIAL_ALIGN != 0
        {
            return Err(ConfigError::InvalidDimensions {
                height: self.height,
                width: self.width,
            });
        }

        // Frame count (must be 4N+1)
        if self.num_frames == 0 || (self.num_frames - 1) % TEMPORAL_STRIDE != 0 {
            return Err(ConfigError::InvalidFrameCount(self.num_frames));
        }

        if !(self.guidance_scale.is_finite() && self.guidance_scale > 0.0) {
            return Err(ConfigError::InvalidScale {
                name: "guidance_scale",
                value: self.guidance_scale,
            });
        }
        if !(self.sample_shift.is_finite() && self.sample_shift > 0.0) {
            return Err(ConfigError::InvalidScale {
                name: "sample_shift",
                value: self.sample_shift,
            });
        }

        Ok(())
    }

    /// Whether classifier-free guidance is active
    pub fn uses_cfg(&self) -> bool {
        self.guidance_scale > 1.0
    }

    /// Set number of inference steps
    pub fn with_steps(mut self, steps: usize) -> Self {
        self.infer_steps = steps;
        self
    }
}

/// Arguments for `generate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub seed: u64,
    /// Conditioning image; required for `i2v`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    /// Where the pipeline writes the video
    pub save_result_path: PathBuf,
}

/// A path that must exist but is not handed to any pipeline call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredPath {
    pub label: String,
    pub path: PathBuf,
}

impl RequiredPath {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

// =============================================================================
// Job
// =============================================================================

/// A complete generation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub pipeline: PipelineSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantize: Option<QuantizeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offload: Option<OffloadConfig>,
    pub generator: GeneratorConfig,
    pub request: GenerateRequest,
    /// Extra files and directories checked before the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_required_paths: Vec<RequiredPath>,
}

impl JobConfig {
    /// Validate the whole job before any filesystem or pipeline work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.model_cls.trim().is_empty() {
            return Err(ConfigError::EmptyField("pipeline.model_cls"));
        }

        self.generator.validate()?;

        if self.request.prompt.trim().is_empty() {
            return Err(ConfigError::EmptyField("request.prompt"));
        }
        if self.pipeline.task.needs_image() && self.request.image_path.is_none() {
            return Err(ConfigError::MissingImage(self.pipeline.task));
        }
        if self.request.save_result_path.file_name().is_none() {
            return Err(ConfigError::InvalidOutputPath(
                self.request.save_result_path.clone(),
            ));
        }

        if let Some(quant) = self.quantize.as_ref().filter(|q| q.dit_quantized) {
            if quant.quant_scheme.trim().is_empty() {
                return Err(ConfigError::EmptyField("quantize.quant_scheme"));
            }
            if quant.high_noise_quantized_ckpt.as_os_str().is_empty() {
                return Err(ConfigError::EmptyField("quantize.high_noise_quantized_ckpt"));
            }
            if quant.low_noise_quantized_ckpt.as_os_str().is_empty() {
                return Err(ConfigError::EmptyField("quantize.low_noise_quantized_ckpt"));
            }
        }

        Ok(())
    }

    /// Every path that must exist before the pipeline is built, in report order
    ///
    /// The order follows the pipeline calls: model root, expert checkpoints,
    /// encoders, input image, then the extra paths declared by the job.
    pub fn required_paths(&self) -> Vec<RequiredPath> {
        let mut paths = vec![RequiredPath::new("Model root", &self.pipeline.model_path)];

        if let Some(quant) = self.quantize.as_ref().filter(|q| q.dit_quantized) {
            paths.push(RequiredPath::new(
                "High noise quantized ckpt",
                &quant.high_noise_quantized_ckpt,
            ));
            paths.push(RequiredPath::new(
                "Low noise quantized ckpt",
                &quant.low_noise_quantized_ckpt,
            ));
        }

        let spec = &self.pipeline;
        let overrides = [
            ("High noise ckpt", &spec.high_noise_original_ckpt),
            ("Low noise ckpt", &spec.low_noise_original_ckpt),
            ("T5 encoder", &spec.t5_original_ckpt),
            ("CLIP encoder", &spec.clip_original_ckpt),
        ];
        for (label, path) in overrides {
            if let Some(path) = path {
                paths.push(RequiredPath::new(label, path));
            }
        }

        if let Some(image) = &self.request.image_path {
            paths.push(RequiredPath::new("Input image", image));
        }

        paths.extend(self.extra_required_paths.iter().cloned());
        paths
    }

    /// Override the generation seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.request.seed = seed;
        self
    }

    /// Override the conditioning image
    pub fn with_image(mut self, image: impl Into<PathBuf>) -> Self {
        self.request.image_path = Some(image.into());
        self
    }

    /// Override the output video path
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.request.save_result_path = output.into();
        self
    }

    /// Override the prompt
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.request.prompt = prompt.into();
        self
    }

    /// Override the negative prompt
    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.request.negative_prompt = negative_prompt.into();
        self
    }

    /// Override the number of inference steps
    pub fn with_steps(mut self, steps: usize) -> Self {
        self.generator = self.generator.with_steps(steps);
        self
    }
}

/// Height and width must be multiples of this (VAE stride 8 × patch 2)
pub const SPATIAL_ALIGN: usize = 16;

/// Temporal compression of the Wan VAE
pub const TEMPORAL_STRIDE: usize = 4;

// =============================================================================
// Loading
// =============================================================================

/// Load a JSON job file and deserialize it
pub fn load_job_config(path: impl AsRef<Path>) -> Result<JobConfig, JobFileError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| JobFileError::FileRead {
        path: path.display().to_string(),
        source: e,
    })?;

    serde_json::from_str(&content).map_err(|e| JobFileError::JsonParse {
        path: path.display().to_string(),
        source: e,
    })
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid step count: {0}. Must be at least 1")]
    InvalidSteps(usize),
    #[error("Invalid frame count: {0}. Must be 4N+1 (e.g., 17, 49, 81, ...)")]
    InvalidFrameCount(usize),
    #[error("Invalid dimensions: height={height}, width={width}. Must be non-zero multiples of 16")]
    InvalidDimensions { height: usize, width: usize },
    #[error("Invalid {name}: {value}. Must be finite and positive")]
    InvalidScale { name: &'static str, value: f64 },
    #[error("Field {0} must not be empty")]
    EmptyField(&'static str),
    #[error("Task {0} requires an input image")]
    MissingImage(Task),
    #[error("Output path has no file name: {}", .0.display())]
    InvalidOutputPath(PathBuf),
}

/// Errors that can occur while reading a job file
#[derive(Debug, thiserror::Error)]
pub enum JobFileError {
    #[error("Failed to read job file: {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse job file: {path}")]
    JsonParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
