//! Pipeline boundary
//!
//! The video model itself lives in an external library. This module defines
//! the calls made against it:
//!
//! ```text
//! PipelineBackend::create → VideoPipeline
//!                              ↓ enable_quantize (optional)
//!                              ↓ enable_offload  (optional)
//!                              ↓ create_generator   (loads the models)
//!                              ↓ generate           (writes the video)
//! ```

use crate::config::{
    GenerateRequest, GeneratorConfig, OffloadConfig, PipelineSpec, QuantizeConfig,
};
use std::path::PathBuf;

/// Factory for pipeline handles
pub trait PipelineBackend {
    type Pipeline: VideoPipeline;

    /// Construct a pipeline for the given model
    fn create(&self, spec: &PipelineSpec) -> Result<Self::Pipeline, PipelineError>;
}

/// A constructed image-to-video pipeline
pub trait VideoPipeline {
    /// Switch the diffusion experts to quantized checkpoints
    fn enable_quantize(&mut self, config: &QuantizeConfig) -> Result<(), PipelineError>;

    /// Configure CPU offloading
    fn enable_offload(&mut self, config: &OffloadConfig) -> Result<(), PipelineError>;

    /// Build the generator. This is where the models are loaded.
    fn create_generator(&mut self, config: &GeneratorConfig) -> Result<(), PipelineError>;

    /// Run generation and return the path of the written video
    fn generate(&mut self, request: &GenerateRequest) -> Result<PathBuf, PipelineError>;
}

/// Errors raised at the pipeline boundary
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("generate called before create_generator")]
    GeneratorNotCreated,

    #[error("Failed to write pipeline config: {path}")]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize pipeline config")]
    ConfigSerialize(#[from] serde_json::Error),

    #[error("Failed to launch `{program}`")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline process exited with {}", exit_code_label(.code))]
    ProcessFailed { code: Option<i32> },

    #[error("Pipeline reported success but no output was written: {}", .0.display())]
    MissingOutput(PathBuf),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}
