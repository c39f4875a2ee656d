//! wan-i2v-runner: configure and launch Wan2.2 image-to-video generation.
//!
//! This crate validates a generation job's inputs, then drives an external
//! video pipeline (LightX2V) through construction, quantization, offload,
//! generator creation and generation.

pub mod checkpoint;
pub mod config;
pub mod lightx2v;
pub mod pipeline;
pub mod presets;
pub mod runner;
pub mod validate;

pub use config::{
    AttnMode, ConfigError, GenerateRequest, GeneratorConfig, JobConfig, JobFileError,
    OffloadConfig, OffloadGranularity, PipelineSpec, QuantizeConfig, RequiredPath, Task,
    load_job_config,
};
pub use pipeline::{PipelineBackend, PipelineError, VideoPipeline};
pub use presets::Preset;
pub use runner::{JobRunner, RunError, RunOutcome, Stage, preflight};
pub use validate::{PathCheck, PathReport};
