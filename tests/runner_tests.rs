//! Tests for the job runner
//!
//! A recording backend stands in for LightX2V so the exact sequence and
//! arguments of pipeline calls can be asserted.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use safetensors::tensor::TensorView;
use safetensors::{Dtype, serialize};
use tempfile::tempdir;
use wan_i2v_runner::config::{
    AttnMode, GenerateRequest, GeneratorConfig, OffloadConfig, OffloadGranularity, PipelineSpec,
    QuantizeConfig, Task,
};
use wan_i2v_runner::presets;
use wan_i2v_runner::{
    JobConfig, JobRunner, PipelineBackend, PipelineError, RunError, Stage, VideoPipeline,
    preflight,
};

// =============================================================================
// Recording backend
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Create(PipelineSpec),
    Quantize(QuantizeConfig),
    Offload(OffloadConfig),
    Generator(GeneratorConfig),
    /// Request plus whether the output directory existed at call time
    Generate(GenerateRequest, bool),
}

#[derive(Clone, Default)]
struct RecordingBackend {
    calls: Rc<RefCell<Vec<Call>>>,
    fail_generator: bool,
}

impl RecordingBackend {
    fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }
}

struct RecordingPipeline {
    calls: Rc<RefCell<Vec<Call>>>,
    fail_generator: bool,
}

impl PipelineBackend for RecordingBackend {
    type Pipeline = RecordingPipeline;

    fn create(&self, spec: &PipelineSpec) -> Result<Self::Pipeline, PipelineError> {
        self.calls.borrow_mut().push(Call::Create(spec.clone()));
        Ok(RecordingPipeline {
            calls: self.calls.clone(),
            fail_generator: self.fail_generator,
        })
    }
}

impl VideoPipeline for RecordingPipeline {
    fn enable_quantize(&mut self, config: &QuantizeConfig) -> Result<(), PipelineError> {
        self.calls.borrow_mut().push(Call::Quantize(config.clone()));
        Ok(())
    }

    fn enable_offload(&mut self, config: &OffloadConfig) -> Result<(), PipelineError> {
        self.calls.borrow_mut().push(Call::Offload(config.clone()));
        Ok(())
    }

    fn create_generator(&mut self, config: &GeneratorConfig) -> Result<(), PipelineError> {
        self.calls.borrow_mut().push(Call::Generator(config.clone()));
        if self.fail_generator {
            return Err(PipelineError::ProcessFailed { code: Some(3) });
        }
        Ok(())
    }

    fn generate(&mut self, request: &GenerateRequest) -> Result<PathBuf, PipelineError> {
        let dir_exists = request
            .save_result_path
            .parent()
            .is_some_and(|p| p.is_dir());
        self.calls
            .borrow_mut()
            .push(Call::Generate(request.clone(), dir_exists));
        Ok(request.save_result_path.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"dummy").unwrap();
}

/// Create every file and directory a job declares as required
fn materialize(job: &JobConfig) {
    for required in job.required_paths() {
        // Model roots like `Wan2.2-I2V` carry a dot, so they are matched explicitly
        let is_dir =
            required.path == job.pipeline.model_path || required.path.extension().is_none();
        if is_dir {
            fs::create_dir_all(&required.path).unwrap();
        } else {
            touch(&required.path);
        }
    }
}

/// Overwrite `path` with a one-tensor safetensors file of the given dtype
fn write_single_tensor(path: &Path, dtype: Dtype, bytes: &[u8], shape: Vec<usize>) {
    let view = TensorView::new(dtype, shape, bytes).unwrap();
    let data = serialize(vec![("blocks.0.weight".to_string(), view)], None).unwrap();
    fs::write(path, data).unwrap();
}

fn quantized_ckpts(job: &JobConfig) -> (PathBuf, PathBuf) {
    let quant = job.quantize.as_ref().unwrap();
    (
        quant.high_noise_quantized_ckpt.clone(),
        quant.low_noise_quantized_ckpt.clone(),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_missing_path_prevents_construction() {
    let root = tempdir().unwrap();
    let job = presets::distill_fp8(root.path());
    materialize(&job);
    fs::remove_file(root.path().join("models/Wan2.2-I2V/Wan2.1_VAE.pth")).unwrap();

    let backend = RecordingBackend::default();
    let mut runner = JobRunner::new(backend.clone());
    let err = runner.run(&job).unwrap_err();

    match err {
        RunError::MissingPaths(report) => {
            let missing: Vec<_> = report.missing().iter().map(|c| c.label.clone()).collect();
            assert_eq!(missing, vec!["VAE".to_string()]);
        }
        other => panic!("expected MissingPaths, got {other:?}"),
    }
    assert!(backend.calls().is_empty(), "pipeline must not be constructed");
    assert!(!root.path().join("save_results").exists());
}

#[test]
fn test_everything_missing_reports_every_path() {
    let root = tempdir().unwrap();
    let job = presets::distill_fp8(&root.path().join("nowhere"));

    let backend = RecordingBackend::default();
    let err = JobRunner::new(backend.clone()).run(&job).unwrap_err();

    let RunError::MissingPaths(report) = err else {
        panic!("expected MissingPaths");
    };
    assert_eq!(report.missing().len(), 8);
    assert!(backend.calls().is_empty());
}

#[test]
fn test_distill_fp8_call_sequence() {
    let root = tempdir().unwrap();
    let job = presets::distill_fp8(root.path());
    materialize(&job);

    let backend = RecordingBackend::default();
    let outcome = JobRunner::new(backend.clone()).run(&job).unwrap();

    assert_eq!(
        outcome.stages,
        vec![
            Stage::CreatePipeline,
            Stage::Quantize,
            Stage::Offload,
            Stage::CreateGenerator,
            Stage::Generate,
        ]
    );
    assert_eq!(
        outcome.output,
        root.path().join("save_results/output_wan22_fp8.mp4")
    );

    let calls = backend.calls();
    assert_eq!(calls.len(), 5);

    let Call::Create(spec) = &calls[0] else {
        panic!("first call must construct the pipeline");
    };
    assert_eq!(spec.model_path, root.path().join("models/Wan2.2-I2V"));
    assert_eq!(spec.model_cls, "wan2.2_moe_distill");
    assert_eq!(spec.task, Task::I2v);
    assert_eq!(
        spec.t5_original_ckpt.as_deref(),
        Some(
            root.path()
                .join("models/Wan2.2-I2V/models_t5/models_t5_umt5-xxl-enc-bf16.pth")
                .as_path()
        )
    );

    let Call::Quantize(quant) = &calls[1] else {
        panic!("second call must enable quantization");
    };
    assert!(quant.dit_quantized);
    assert_eq!(quant.quant_scheme, "fp8-triton");

    let Call::Offload(offload) = &calls[2] else {
        panic!("third call must enable offload");
    };
    assert!(offload.cpu_offload);
    assert_eq!(offload.offload_granularity, OffloadGranularity::Phase);
    assert!(offload.text_encoder_offload);
    assert!(!offload.image_encoder_offload);
    assert!(!offload.vae_offload);

    let Call::Generator(generator) = &calls[3] else {
        panic!("fourth call must create the generator");
    };
    assert_eq!(generator.attn_mode, AttnMode::TorchSdpa);
    assert_eq!(generator.infer_steps, 4);
    assert_eq!(generator.height, 480);
    assert_eq!(generator.width, 832);
    assert_eq!(generator.num_frames, 81);
    assert_eq!(generator.guidance_scale, 1.0);
    assert_eq!(generator.sample_shift, 5.0);

    let Call::Generate(request, dir_existed) = &calls[4] else {
        panic!("last call must generate");
    };
    assert_eq!(request.seed, 42);
    assert_eq!(
        request.image_path.as_deref(),
        Some(root.path().join("assets/img_lightx2v.png").as_path())
    );
    assert_eq!(request.prompt, presets::CAT_PROMPT);
    assert_eq!(request.negative_prompt, presets::WAN_NEGATIVE_PROMPT);
    assert!(dir_existed, "output directory must exist before generate");
}

#[test]
fn test_verify_skips_quantize_stage() {
    let root = tempdir().unwrap();
    let job = presets::verify(root.path());
    materialize(&job);

    let backend = RecordingBackend::default();
    let outcome = JobRunner::new(backend.clone()).run(&job).unwrap();

    assert!(!outcome.stages.contains(&Stage::Quantize));
    let calls = backend.calls();
    assert_eq!(calls.len(), 4);
    assert!(matches!(
        &calls[1],
        Call::Offload(o) if o.offload_granularity == OffloadGranularity::Model
    ));
}

#[test]
fn test_output_directory_created_before_generate() {
    let root = tempdir().unwrap();
    let out = root.path().join("deep/nested/results/video.mp4");
    let job = presets::verify(root.path()).with_output(&out);
    materialize(&job);
    assert!(!out.parent().unwrap().exists());

    let backend = RecordingBackend::default();
    JobRunner::new(backend.clone()).run(&job).unwrap();

    assert!(out.parent().unwrap().is_dir());
    let Some(Call::Generate(_, dir_existed)) = backend.calls().pop() else {
        panic!("generate was not called");
    };
    assert!(dir_existed);
}

#[test]
fn test_invalid_config_fails_before_path_check() {
    let root = tempdir().unwrap();
    let mut job = presets::verify(root.path());
    job.generator.num_frames = 80;

    let backend = RecordingBackend::default();
    let err = JobRunner::new(backend.clone()).run(&job).unwrap_err();
    assert!(matches!(err, RunError::Config(_)));
    assert!(backend.calls().is_empty());
}

#[test]
fn test_pipeline_error_names_stage() {
    let root = tempdir().unwrap();
    let job = presets::verify(root.path());
    materialize(&job);

    let backend = RecordingBackend {
        fail_generator: true,
        ..Default::default()
    };
    let err = JobRunner::new(backend.clone()).run(&job).unwrap_err();

    match err {
        RunError::Pipeline { stage, .. } => assert_eq!(stage, Stage::CreateGenerator),
        other => panic!("expected Pipeline error, got {other:?}"),
    }
    assert!(!backend.calls().iter().any(|c| matches!(c, Call::Generate(..))));
}

#[test]
fn test_stage_callback_sees_every_stage() {
    let root = tempdir().unwrap();
    let job = presets::distill_fp8(root.path());
    materialize(&job);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    JobRunner::new(RecordingBackend::default())
        .on_stage(move |stage| sink.borrow_mut().push(stage.index()))
        .run(&job)
        .unwrap();

    assert_eq!(*seen.borrow(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_overrides_reach_pipeline() {
    let root = tempdir().unwrap();
    let job = presets::verify(root.path())
        .with_seed(7)
        .with_steps(8)
        .with_prompt("a lighthouse at dusk");
    materialize(&job);

    let backend = RecordingBackend::default();
    JobRunner::new(backend.clone()).run(&job).unwrap();

    for call in backend.calls() {
        match call {
            Call::Generator(g) => assert_eq!(g.infer_steps, 8),
            Call::Generate(r, _) => {
                assert_eq!(r.seed, 7);
                assert_eq!(r.prompt, "a lighthouse at dusk");
            }
            _ => {}
        }
    }
}

#[test]
fn test_bf16_checkpoint_under_fp8_scheme_warns_and_runs() {
    let root = tempdir().unwrap();
    let job = presets::distill_fp8(root.path());
    materialize(&job);
    let (high, low) = quantized_ckpts(&job);
    write_single_tensor(&high, Dtype::BF16, &[0u8; 8], vec![2, 2]);
    write_single_tensor(&low, Dtype::F8_E4M3, &[0u8; 4], vec![2, 2]);

    let backend = RecordingBackend::default();
    let outcome = JobRunner::new(backend.clone()).run(&job).unwrap();

    assert_eq!(outcome.warnings.len(), 1);
    let warning = &outcome.warnings[0];
    assert!(warning.contains(&high.display().to_string()));
    assert!(warning.contains("fp8-triton"));
    assert!(warning.contains("BF16"));
    assert_eq!(outcome.stages.last(), Some(&Stage::Generate));
    assert_eq!(backend.calls().len(), 5);
}

#[test]
fn test_fp8_checkpoints_raise_no_warning() {
    let root = tempdir().unwrap();
    let job = presets::distill_fp8(root.path());
    materialize(&job);
    let (high, low) = quantized_ckpts(&job);
    write_single_tensor(&high, Dtype::F8_E4M3, &[0u8; 4], vec![2, 2]);
    write_single_tensor(&low, Dtype::F8_E4M3, &[0u8; 4], vec![2, 2]);

    let outcome = JobRunner::new(RecordingBackend::default())
        .run(&job)
        .unwrap();
    assert!(outcome.warnings.is_empty());
}

#[test]
fn test_unreadable_checkpoint_header_does_not_block_run() {
    let root = tempdir().unwrap();
    let job = presets::distill_fp8(root.path());
    materialize(&job);
    let (high, _) = quantized_ckpts(&job);
    let mut garbage = 1_000u64.to_le_bytes().to_vec();
    garbage.extend_from_slice(b"{ not a header");
    fs::write(&high, garbage).unwrap();

    let backend = RecordingBackend::default();
    let outcome = JobRunner::new(backend.clone()).run(&job).unwrap();

    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.stages.len(), 5);
    assert!(matches!(backend.calls().last(), Some(Call::Generate(..))));
}

#[test]
fn test_run_checked_reuses_preflight_report() {
    let root = tempdir().unwrap();
    let job = presets::verify(root.path());
    materialize(&job);
    let report = preflight(&job).unwrap();
    let checked = report.checks().len();

    // Paths are not probed a second time once the report exists
    fs::remove_file(root.path().join("assets/img_lightx2v.png")).unwrap();

    let backend = RecordingBackend::default();
    let outcome = JobRunner::new(backend.clone())
        .run_checked(&job, report)
        .unwrap();

    assert_eq!(outcome.report.checks().len(), checked);
    assert!(outcome.report.all_present());
    assert!(matches!(backend.calls().last(), Some(Call::Generate(..))));
}
