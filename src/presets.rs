//! Built-in Wan2.2 image-to-video jobs
//!
//! Both presets target a LightX2V checkout at `root` and run the MoE distill
//! model for 4 steps at 480x832, 81 frames (~5 seconds at 16fps).

use crate::config::{
    AttnMode, GenerateRequest, GeneratorConfig, JobConfig, OffloadConfig, OffloadGranularity,
    PipelineSpec, QuantizeConfig, RequiredPath, Task,
};
use std::path::Path;

pub const MODEL_CLS: &str = "wan2.2_moe_distill";

pub const DEFAULT_SEED: u64 = 42;

pub const CAT_PROMPT: &str = "Summer beach vacation style, a white cat wearing sunglasses sits on a surfboard. \
The fluffy-furred feline gazes directly at the camera with a relaxed expression. \
Blurred beach scenery forms the background featuring crystal-clear waters, \
distant green hills, and a blue sky dotted with white clouds.";

/// Standard Wan negative prompt
pub const WAN_NEGATIVE_PROMPT: &str = "镜头晃动，色调艳丽，过曝，静态，细节模糊不清，字幕，风格，作品，画作，画面，\
静止，整体发灰，最差质量，低质量，JPEG压缩残留，丑陋的，残缺的，多余的手指，\
画得不好的手部，画得不好的脸部，畸形的，毁容的，形态畸形的肢体，手指融合，\
静止不动的画面，杂乱的背景，三条腿，背景人很多，倒着走";

pub const CITY_PROMPT: &str =
    "A cinematic video of a futuristic city with neon lights, high quality, 4k.";

pub const CITY_NEGATIVE_PROMPT: &str = "low quality, blurry, static, distorted";

/// A named, built-in job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// FP8-quantized distill experts with phase offload
    DistillFp8,
    /// Unquantized experts with model offload
    Verify,
}

impl Preset {
    pub const ALL: [Preset; 2] = [Preset::DistillFp8, Preset::Verify];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::DistillFp8 => "distill-fp8",
            Preset::Verify => "verify",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Preset::DistillFp8 => {
                "Wan2.2 distill, FP8 (fp8-triton) experts, phase offload, explicit T5/CLIP paths"
            }
            Preset::Verify => "Wan2.2 distill, original safetensors experts, model offload",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Resolve the preset against a LightX2V checkout
    pub fn job(&self, root: &Path) -> JobConfig {
        match self {
            Preset::DistillFp8 => distill_fp8(root),
            Preset::Verify => verify(root),
        }
    }
}

/// Generator settings shared by both presets
pub fn distill_generator() -> GeneratorConfig {
    GeneratorConfig {
        attn_mode: AttnMode::TorchSdpa,
        infer_steps: 4,
        height: 480,
        width: 832,
        num_frames: 81,
        // CFG disabled for distill
        guidance_scale: 1.0,
        sample_shift: 5.0,
    }
}

/// FP8-quantized distill run with explicit paths for every component
pub fn distill_fp8(root: &Path) -> JobConfig {
    let model_root = root.join("models").join("Wan2.2-I2V");

    let high_noise = model_root
        .join("high_noise_model")
        .join("wan2.2_i2v_A14b_high_noise_scaled_fp8_e4m3_lightx2v_4step.safetensors");
    let low_noise = model_root
        .join("low_noise_model")
        .join("wan2.2_i2v_A14b_low_noise_scaled_fp8_e4m3_lightx2v_4step.safetensors");
    let t5 = model_root
        .join("models_t5")
        .join("models_t5_umt5-xxl-enc-bf16.pth");
    let clip = model_root
        .join("models_clip")
        .join("models_clip_open-clip-xlm-roberta-large-vit-huge-14.pth");

    JobConfig {
        pipeline: PipelineSpec {
            model_path: model_root.clone(),
            model_cls: MODEL_CLS.to_string(),
            task: Task::I2v,
            low_noise_original_ckpt: None,
            high_noise_original_ckpt: None,
            // T5 and CLIP live in non-standard subdirectories
            t5_original_ckpt: Some(t5),
            clip_original_ckpt: Some(clip),
        },
        quantize: Some(QuantizeConfig {
            dit_quantized: true,
            quant_scheme: "fp8-triton".to_string(),
            high_noise_quantized_ckpt: high_noise,
            low_noise_quantized_ckpt: low_noise,
        }),
        offload: Some(OffloadConfig {
            cpu_offload: true,
            offload_granularity: OffloadGranularity::Phase,
            text_encoder_offload: true,
            image_encoder_offload: false,
            vae_offload: false,
        }),
        generator: distill_generator(),
        request: GenerateRequest {
            seed: DEFAULT_SEED,
            image_path: Some(root.join("assets").join("img_lightx2v.png")),
            prompt: CAT_PROMPT.to_string(),
            negative_prompt: WAN_NEGATIVE_PROMPT.to_string(),
            save_result_path: root.join("save_results").join("output_wan22_fp8.mp4"),
        },
        extra_required_paths: vec![
            RequiredPath::new("Google tokenizer", model_root.join("google").join("umt5-xxl")),
            RequiredPath::new("VAE", model_root.join("Wan2.1_VAE.pth")),
        ],
    }
}

/// Verification run against the unquantized A14B experts
pub fn verify(root: &Path) -> JobConfig {
    let model_root = root.join("models").join("Wan2.2-I2V-A14B");

    JobConfig {
        pipeline: PipelineSpec {
            model_path: model_root.clone(),
            model_cls: MODEL_CLS.to_string(),
            task: Task::I2v,
            low_noise_original_ckpt: Some(
                model_root
                    .join("low_noise_model")
                    .join("diffusion_pytorch_model.safetensors"),
            ),
            high_noise_original_ckpt: Some(
                model_root
                    .join("high_noise_model")
                    .join("diffusion_pytorch_model.safetensors"),
            ),
            t5_original_ckpt: None,
            clip_original_ckpt: None,
        },
        quantize: None,
        offload: Some(OffloadConfig {
            cpu_offload: true,
            // model granularity for lazy-loading stability
            offload_granularity: OffloadGranularity::Model,
            text_encoder_offload: true,
            image_encoder_offload: false,
            vae_offload: false,
        }),
        generator: distill_generator(),
        request: GenerateRequest {
            seed: DEFAULT_SEED,
            image_path: Some(root.join("assets").join("img_lightx2v.png")),
            prompt: CITY_PROMPT.to_string(),
            negative_prompt: CITY_NEGATIVE_PROMPT.to_string(),
            save_result_path: root.join("save_results").join("output_verify.mp4"),
        },
        extra_required_paths: Vec::new(),
    }
}
