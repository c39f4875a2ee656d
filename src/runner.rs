//! Job runner
//!
//! Drives one [`JobConfig`] through a [`PipelineBackend`] in a fixed order:
//! validate → construct → quantize → offload → generator → generate.
//! Nothing is constructed unless every required path exists.

use crate::checkpoint::{CheckpointSummary, inspect_checkpoint};
use crate::config::{ConfigError, JobConfig};
use crate::pipeline::{PipelineBackend, PipelineError, VideoPipeline};
use crate::validate::PathReport;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Total number of pipeline stages reported as `[n/5]`
pub const STAGE_COUNT: usize = 5;

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CreatePipeline,
    Quantize,
    Offload,
    CreateGenerator,
    Generate,
}

impl Stage {
    pub fn index(&self) -> usize {
        match self {
            Stage::CreatePipeline => 1,
            Stage::Quantize => 2,
            Stage::Offload => 3,
            Stage::CreateGenerator => 4,
            Stage::Generate => 5,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Stage::CreatePipeline => "Creating pipeline",
            Stage::Quantize => "Enabling quantization",
            Stage::Offload => "Enabling CPU offload",
            Stage::CreateGenerator => "Creating generator (this loads the models)",
            Stage::Generate => "Generating video",
        }
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Path report from the validation step (all present)
    pub report: PathReport,
    /// Video written by the pipeline
    pub output: PathBuf,
    /// Stages that actually ran, in order
    pub stages: Vec<Stage>,
    /// Checkpoint warnings raised before construction
    pub warnings: Vec<String>,
}

/// Errors that stop a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Invalid job configuration")]
    Config(#[from] ConfigError),

    #[error("{} required path(s) missing", .0.missing().len())]
    MissingPaths(PathReport),

    #[error("Failed to create output directory: {path}")]
    OutputDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline stage \"{}\" failed", .stage.description())]
    Pipeline {
        stage: Stage,
        #[source]
        source: PipelineError,
    },
}

/// Validate the job's configuration and required paths without touching a backend
pub fn preflight(job: &JobConfig) -> Result<PathReport, RunError> {
    job.validate()?;
    let report = PathReport::check(&job.required_paths());
    if !report.all_present() {
        return Err(RunError::MissingPaths(report));
    }
    Ok(report)
}

/// Runs jobs against a backend
pub struct JobRunner<B: PipelineBackend> {
    backend: B,
    on_stage: Option<Box<dyn FnMut(Stage)>>,
}

impl<B: PipelineBackend> JobRunner<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            on_stage: None,
        }
    }

    /// Register a callback invoked as each stage starts
    pub fn on_stage(mut self, callback: impl FnMut(Stage) + 'static) -> Self {
        self.on_stage = Some(Box::new(callback));
        self
    }

    /// Run the job to completion
    pub fn run(&mut self, job: &JobConfig) -> Result<RunOutcome, RunError> {
        let report = preflight(job)?;
        self.run_checked(job, report)
    }

    /// Run a job whose [`preflight`] already passed, reusing its report
    pub fn run_checked(
        &mut self,
        job: &JobConfig,
        report: PathReport,
    ) -> Result<RunOutcome, RunError> {
        info!("All {} required paths present", report.checks().len());

        let mut warnings = Vec::new();
        if let Some(quant) = job.quantize.as_ref().filter(|q| q.dit_quantized) {
            for ckpt in [
                &quant.high_noise_quantized_ckpt,
                &quant.low_noise_quantized_ckpt,
            ] {
                warnings.extend(check_fp8(ckpt, &quant.quant_scheme));
            }
        }

        let mut stages = Vec::with_capacity(STAGE_COUNT);

        self.enter(Stage::CreatePipeline, &mut stages);
        info!(
            model_cls = %job.pipeline.model_cls,
            task = %job.pipeline.task,
            "Model path: {}",
            job.pipeline.model_path.display()
        );
        let mut pipeline = self
            .backend
            .create(&job.pipeline)
            .map_err(|source| RunError::Pipeline {
                stage: Stage::CreatePipeline,
                source,
            })?;

        if let Some(quant) = &job.quantize {
            self.enter(Stage::Quantize, &mut stages);
            info!("Quant scheme: {}", quant.quant_scheme);
            pipeline
                .enable_quantize(quant)
                .map_err(|source| RunError::Pipeline {
                    stage: Stage::Quantize,
                    source,
                })?;
        }

        if let Some(offload) = &job.offload {
            self.enter(Stage::Offload, &mut stages);
            info!("Offload granularity: {}", offload.offload_granularity);
            pipeline
                .enable_offload(offload)
                .map_err(|source| RunError::Pipeline {
                    stage: Stage::Offload,
                    source,
                })?;
        }

        ensure_output_dir(&job.request.save_result_path)?;

        self.enter(Stage::CreateGenerator, &mut stages);
        let generator = &job.generator;
        info!(
            "Video: {}x{} @ {} frames, {} steps, guidance {}, shift {}",
            generator.width,
            generator.height,
            generator.num_frames,
            generator.infer_steps,
            generator.guidance_scale,
            generator.sample_shift
        );
        pipeline
            .create_generator(generator)
            .map_err(|source| RunError::Pipeline {
                stage: Stage::CreateGenerator,
                source,
            })?;

        self.enter(Stage::Generate, &mut stages);
        info!("Seed: {}", job.request.seed);
        let output = pipeline
            .generate(&job.request)
            .map_err(|source| RunError::Pipeline {
                stage: Stage::Generate,
                source,
            })?;

        info!("Video saved to {}", output.display());
        Ok(RunOutcome {
            report,
            output,
            stages,
            warnings,
        })
    }

    fn enter(&mut self, stage: Stage, stages: &mut Vec<Stage>) {
        debug!("[{}/{}] {}", stage.index(), STAGE_COUNT, stage.description());
        if let Some(callback) = self.on_stage.as_mut() {
            callback(stage);
        }
        stages.push(stage);
    }
}

/// Create the parent directory of the output file if it does not exist
pub fn ensure_output_dir(save_path: &Path) -> Result<(), RunError> {
    let Some(parent) = save_path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    std::fs::create_dir_all(parent).map_err(|e| RunError::OutputDir {
        path: parent.display().to_string(),
        source: e,
    })
}

/// Returns a warning when an FP8-scheme checkpoint holds no FP8 tensors.
/// Unreadable headers are logged and never stop the run.
fn check_fp8(ckpt: &Path, scheme: &str) -> Option<String> {
    if !scheme.starts_with("fp8") || ckpt.extension().is_none_or(|e| e != "safetensors") {
        return None;
    }
    match inspect_checkpoint(ckpt) {
        Ok(summary) if !summary.is_fp8() => {
            let message = format!(
                "{} is configured for {} but holds no FP8 tensors ({})",
                ckpt.display(),
                scheme,
                dtype_list(&summary)
            );
            warn!("{message}");
            Some(message)
        }
        Ok(summary) => {
            debug!(
                "{}: {} tensors, {}",
                ckpt.display(),
                summary.tensor_count,
                dtype_list(&summary)
            );
            None
        }
        Err(e) => {
            debug!("Could not read header of {}: {}", ckpt.display(), e);
            None
        }
    }
}

fn dtype_list(summary: &CheckpointSummary) -> String {
    summary
        .dtypes
        .iter()
        .map(|(dtype, count)| format!("{dtype}×{count}"))
        .collect::<Vec<_>>()
        .join(", ")
}
