//! LightX2V process backend
//!
//! Each pipeline call records its settings into an [`InferConfig`]. On
//! `generate` the config is written next to the output video and LightX2V's
//! inference entry point is launched as a child process:
//!
//! ```text
//! python -m lightx2v.infer --model_cls ... --task ... --model_path ...
//!        --config_json <output>.config.json --seed ... --prompt ...
//!        --negative_prompt ... [--image_path ...] --save_result_path ...
//! ```

use crate::config::{
    GenerateRequest, GeneratorConfig, OffloadConfig, OffloadGranularity, PipelineSpec,
    QuantizeConfig,
};
use crate::pipeline::{PipelineBackend, PipelineError, VideoPipeline};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_MODULE: &str = "lightx2v.infer";

/// Inference config consumed by `lightx2v.infer --config_json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infer_steps: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_video_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_height: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_width: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_guide_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_shift: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_cfg: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_attn_1_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_attn_1_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_attn_2_type: Option<String>,

    // Offload
    #[serde(default)]
    pub cpu_offload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offload_granularity: Option<OffloadGranularity>,
    #[serde(default)]
    pub t5_cpu_offload: bool,
    #[serde(default)]
    pub clip_cpu_offload: bool,
    #[serde(default)]
    pub vae_cpu_offload: bool,

    // Quantization
    #[serde(default)]
    pub dit_quantized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dit_quant_scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_noise_quantized_ckpt: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_noise_quantized_ckpt: Option<PathBuf>,

    // Checkpoint overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_noise_original_ckpt: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_noise_original_ckpt: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t5_original_ckpt: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_original_ckpt: Option<PathBuf>,
}

impl InferConfig {
    fn from_spec(spec: &PipelineSpec) -> Self {
        Self {
            high_noise_original_ckpt: spec.high_noise_original_ckpt.clone(),
            low_noise_original_ckpt: spec.low_noise_original_ckpt.clone(),
            t5_original_ckpt: spec.t5_original_ckpt.clone(),
            clip_original_ckpt: spec.clip_original_ckpt.clone(),
            ..Self::default()
        }
    }

    fn apply_quantize(&mut self, config: &QuantizeConfig) {
        self.dit_quantized = config.dit_quantized;
        if config.dit_quantized {
            self.dit_quant_scheme = Some(config.quant_scheme.clone());
            self.high_noise_quantized_ckpt = Some(config.high_noise_quantized_ckpt.clone());
            self.low_noise_quantized_ckpt = Some(config.low_noise_quantized_ckpt.clone());
        }
    }

    fn apply_offload(&mut self, config: &OffloadConfig) {
        self.cpu_offload = config.cpu_offload;
        self.offload_granularity = config.cpu_offload.then_some(config.offload_granularity);
        self.t5_cpu_offload = config.text_encoder_offload;
        self.clip_cpu_offload = config.image_encoder_offload;
        self.vae_cpu_offload = config.vae_offload;
    }

    fn apply_generator(&mut self, config: &GeneratorConfig) {
        let attn = config.attn_mode.as_str().to_string();
        self.infer_steps = Some(config.infer_steps);
        self.target_video_length = Some(config.num_frames);
        self.target_height = Some(config.height);
        self.target_width = Some(config.width);
        self.sample_guide_scale = Some(config.guidance_scale);
        self.sample_shift = Some(config.sample_shift);
        self.enable_cfg = Some(config.uses_cfg());
        self.self_attn_1_type = Some(attn.clone());
        self.cross_attn_1_type = Some(attn.clone());
        self.cross_attn_2_type = Some(attn);
    }
}

/// Launches LightX2V through a Python interpreter
#[derive(Debug, Clone)]
pub struct Lightx2vBackend {
    python: PathBuf,
    module: String,
    working_dir: Option<PathBuf>,
    dry_run: bool,
}

impl Default for Lightx2vBackend {
    fn default() -> Self {
        Self::new(DEFAULT_PYTHON)
    }
}

impl Lightx2vBackend {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            module: DEFAULT_MODULE.to_string(),
            working_dir: None,
            dry_run: false,
        }
    }

    /// Python module to run with `-m`
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Directory the interpreter is started in (usually the LightX2V checkout)
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Write the config and log the command without launching anything
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

impl PipelineBackend for Lightx2vBackend {
    type Pipeline = Lightx2vPipeline;

    fn create(&self, spec: &PipelineSpec) -> Result<Self::Pipeline, PipelineError> {
        debug!(
            "LightX2V backend: {} -m {}",
            self.python.display(),
            self.module
        );
        Ok(Lightx2vPipeline {
            backend: self.clone(),
            spec: spec.clone(),
            config: InferConfig::from_spec(spec),
            generator_ready: false,
            last_command: None,
        })
    }
}

/// Pipeline state accumulated for one LightX2V launch
#[derive(Debug)]
pub struct Lightx2vPipeline {
    backend: Lightx2vBackend,
    spec: PipelineSpec,
    config: InferConfig,
    generator_ready: bool,
    last_command: Option<Vec<OsString>>,
}

impl Lightx2vPipeline {
    pub fn config(&self) -> &InferConfig {
        &self.config
    }

    /// Arguments of the most recent launch (or dry run), without the interpreter
    pub fn last_command(&self) -> Option<&[OsString]> {
        self.last_command.as_deref()
    }

    fn command_args(&self, request: &GenerateRequest, config_path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-m".into(),
            self.backend.module.clone().into(),
            "--model_cls".into(),
            self.spec.model_cls.clone().into(),
            "--task".into(),
            self.spec.task.as_str().into(),
            "--model_path".into(),
            self.spec.model_path.clone().into(),
            "--config_json".into(),
            config_path.into(),
            "--seed".into(),
            request.seed.to_string().into(),
            "--prompt".into(),
            request.prompt.clone().into(),
            "--negative_prompt".into(),
            request.negative_prompt.clone().into(),
        ];
        if let Some(image) = &request.image_path {
            args.push("--image_path".into());
            args.push(image.clone().into());
        }
        args.push("--save_result_path".into());
        args.push(request.save_result_path.clone().into());
        args
    }
}

/// Location of the inference config written for an output video
pub fn config_path_for(save_result_path: &Path) -> PathBuf {
    save_result_path.with_extension("config.json")
}

impl VideoPipeline for Lightx2vPipeline {
    fn enable_quantize(&mut self, config: &QuantizeConfig) -> Result<(), PipelineError> {
        self.config.apply_quantize(config);
        Ok(())
    }

    fn enable_offload(&mut self, config: &OffloadConfig) -> Result<(), PipelineError> {
        self.config.apply_offload(config);
        Ok(())
    }

    fn create_generator(&mut self, config: &GeneratorConfig) -> Result<(), PipelineError> {
        self.config.apply_generator(config);
        self.generator_ready = true;
        Ok(())
    }

    fn generate(&mut self, request: &GenerateRequest) -> Result<PathBuf, PipelineError> {
        if !self.generator_ready {
            return Err(PipelineError::GeneratorNotCreated);
        }

        let config_path = config_path_for(&request.save_result_path);
        let json = serde_json::to_string_pretty(&self.config)?;
        std::fs::write(&config_path, json).map_err(|e| PipelineError::ConfigWrite {
            path: config_path.display().to_string(),
            source: e,
        })?;
        debug!("Wrote inference config to {}", config_path.display());

        let args = self.command_args(request, &config_path);
        let printable = args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        self.last_command = Some(args.clone());

        if self.backend.dry_run {
            info!(
                "Dry run, not launching: {} {}",
                self.backend.python.display(),
                printable
            );
            return Ok(request.save_result_path.clone());
        }

        info!("Launching {} {}", self.backend.python.display(), printable);
        let mut command = Command::new(&self.backend.python);
        command.args(&args);
        if let Some(dir) = &self.backend.working_dir {
            command.current_dir(dir);
        }

        let status = command.status().map_err(|e| PipelineError::Launch {
            program: self.backend.python.display().to_string(),
            source: e,
        })?;
        if !status.success() {
            return Err(PipelineError::ProcessFailed {
                code: status.code(),
            });
        }

        if !request.save_result_path.exists() {
            return Err(PipelineError::MissingOutput(
                request.save_result_path.clone(),
            ));
        }
        Ok(request.save_result_path.clone())
    }
}
