//! Wan2.2 image-to-video launcher
//!
//! Validates every model and input path, then runs LightX2V with the
//! selected job.
//!
//! # Usage
//!
//! ```bash
//! wan-i2v --root ~/LightX2V check distill-fp8
//! wan-i2v --root ~/LightX2V run distill-fp8 --seed 7
//! wan-i2v show verify > job.json
//! wan-i2v run --job job.json --dry-run
//! wan-i2v inspect models/Wan2.2-I2V/high_noise_model/*.safetensors
//! ```

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

use wan_i2v_runner::{
    JobConfig, JobRunner, PathReport, Preset, RunError,
    checkpoint::inspect_checkpoint,
    lightx2v::{DEFAULT_MODULE, DEFAULT_PYTHON, Lightx2vBackend},
    load_job_config, preflight,
    runner::STAGE_COUNT,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    name = "wan-i2v",
    author,
    version,
    about = "Validate and launch Wan2.2 image-to-video jobs through LightX2V",
    arg_required_else_help = true
)]
struct Cli {
    /// LightX2V checkout that preset paths are resolved against
    #[arg(long, global = true, env = "LIGHTX2V_ROOT", default_value = ".")]
    root: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List built-in presets
    Presets,
    /// Print the resolved job as JSON
    Show(JobSource),
    /// Check that every required path exists
    Check(JobSource),
    /// Validate paths and run generation
    Run(RunArgs),
    /// Summarize safetensors checkpoint headers
    Inspect {
        /// Checkpoint files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct JobSource {
    /// Built-in preset (see `wan-i2v presets`)
    #[arg(required_unless_present = "job", conflicts_with = "job")]
    preset: Option<String>,

    /// JSON job file
    #[arg(long)]
    job: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    source: JobSource,

    /// Python interpreter with LightX2V installed
    #[arg(long, default_value = DEFAULT_PYTHON)]
    python: PathBuf,

    /// Python module to launch
    #[arg(long, default_value = DEFAULT_MODULE)]
    module: String,

    /// Write the inference config and print the command without launching
    #[arg(long)]
    dry_run: bool,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Input image
    #[arg(long)]
    image: Option<PathBuf>,

    /// Output video path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Text prompt
    #[arg(long)]
    prompt: Option<String>,

    /// Negative prompt
    #[arg(long)]
    negative_prompt: Option<String>,

    /// Number of inference steps
    #[arg(long)]
    steps: Option<usize>,
}

impl RunArgs {
    fn apply(&self, mut job: JobConfig) -> JobConfig {
        if let Some(seed) = self.seed {
            job = job.with_seed(seed);
        }
        if let Some(image) = &self.image {
            job = job.with_image(image);
        }
        if let Some(output) = &self.output {
            job = job.with_output(output);
        }
        if let Some(prompt) = &self.prompt {
            job = job.with_prompt(prompt);
        }
        if let Some(negative_prompt) = &self.negative_prompt {
            job = job.with_negative_prompt(negative_prompt);
        }
        if let Some(steps) = self.steps {
            job = job.with_steps(steps);
        }
        job
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match &cli.command {
        Commands::Presets => {
            for preset in Preset::ALL {
                println!("{:<12} {}", preset.name(), preset.description());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show(source) => {
            let job = resolve_job(source, &cli.root)?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check(source) => {
            let job = resolve_job(source, &cli.root)?;
            check(&job)
        }
        Commands::Run(args) => {
            let job = args.apply(resolve_job(&args.source, &cli.root)?);
            run(&job, args, &cli.root)
        }
        Commands::Inspect { files } => inspect(files),
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("wan_i2v_runner={level}").parse()?)
                .add_directive(format!("wan_i2v={level}").parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn resolve_job(source: &JobSource, root: &Path) -> Result<JobConfig> {
    if let Some(path) = &source.job {
        return load_job_config(path).context("Failed to load job file");
    }

    let name = source.preset.as_deref().unwrap_or_default();
    let preset = Preset::from_name(name).ok_or_else(|| {
        let known: Vec<_> = Preset::ALL.iter().map(|p| p.name()).collect();
        anyhow!("Unknown preset `{}` (available: {})", name, known.join(", "))
    })?;
    info!("Using preset {} with root {}", preset.name(), root.display());
    Ok(preset.job(root))
}

/// Print the path report; returns false when something is missing
fn print_report(report: &PathReport) -> bool {
    println!("{}", "=".repeat(60));
    println!("Validating paths...");
    println!("{}", report.render());
    println!("{}", "=".repeat(60));
    report.all_present()
}

fn check(job: &JobConfig) -> Result<ExitCode> {
    match preflight(job) {
        Ok(report) => {
            print_report(&report);
            Ok(ExitCode::SUCCESS)
        }
        Err(RunError::MissingPaths(report)) => {
            print_report(&report);
            Ok(ExitCode::from(1))
        }
        Err(e) => Err(e).context("Job validation failed"),
    }
}

fn run(job: &JobConfig, args: &RunArgs, root: &Path) -> Result<ExitCode> {
    let report = match preflight(job) {
        Ok(report) => report,
        Err(RunError::MissingPaths(report)) => {
            print_report(&report);
            return Ok(ExitCode::from(1));
        }
        Err(e) => return Err(e).context("Job validation failed"),
    };
    print_report(&report);

    let mut backend = Lightx2vBackend::new(&args.python)
        .with_module(&args.module)
        .with_dry_run(args.dry_run);
    if root.is_dir() {
        backend = backend.with_working_dir(root);
    }

    let mut runner = JobRunner::new(backend).on_stage(|stage| {
        println!(
            "[{}/{}] {}...",
            stage.index(),
            STAGE_COUNT,
            stage.description()
        );
    });

    let outcome = runner
        .run_checked(job, report)
        .context("Generation failed")?;

    if args.dry_run {
        println!("\n✓ Dry run complete, video would be saved to: {}", outcome.output.display());
    } else {
        println!("\n✓ Video saved to: {}", outcome.output.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn inspect(files: &[PathBuf]) -> Result<ExitCode> {
    let mut failed = 0usize;

    for file in files {
        match inspect_checkpoint(file) {
            Ok(summary) => {
                println!("{}", file.display());
                println!("  Tensors: {}", summary.tensor_count);
                for (dtype, count) in &summary.dtypes {
                    println!("    {dtype}: {count}");
                }
                println!(
                    "  Payload: {:.2} GiB",
                    summary.payload_bytes as f64 / (1u64 << 30) as f64
                );
                println!("  FP8: {}", if summary.is_fp8() { "yes" } else { "no" });
                for (key, value) in &summary.metadata {
                    println!("  {key}: {value}");
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("✗ {:#}", anyhow::Error::new(e));
            }
        }
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
