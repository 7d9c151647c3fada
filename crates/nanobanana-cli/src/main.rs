mod command_renderer;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nanobanana_contracts::options::{
    AspectRatio, CameraAngle, GenerationOptions, Lighting, PromptStyle, Quality, ServiceMode,
};
use nanobanana_contracts::prompt::build_prompt;
use nanobanana_engine::cancel::CancelToken;
use nanobanana_engine::capture::CaptureChain;
use nanobanana_engine::codec;
use nanobanana_engine::config::{
    credential_file_path, default_output_dir, save_api_key, Credentials, EngineConfig,
    MAX_TIMEOUT_S, MIN_TIMEOUT_S,
};
use nanobanana_engine::pipeline::{GenerationOutput, Pipeline, PipelineOutcome};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::command_renderer::{CommandRenderer, SceneCounts};

#[derive(Debug, Parser)]
#[command(
    name = "nanobanana",
    version,
    about = "Capture a renderer view and transform it with an image generation API"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture, send and save the generated image.
    Generate(GenerateArgs),
    /// Capture and ask for a written rendering critique.
    Analyze(AnalyzeArgs),
    /// Run only the capture chain and write the input image.
    Capture(CaptureArgs),
    /// Print the composed prompt without any I/O.
    Prompt(PromptArgs),
    /// Store the API key in the user config directory.
    SetKey(SetKeyArgs),
}

#[derive(Debug, Args)]
struct OptionArgs {
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long, default_value = "")]
    legacy_prompt: String,
    #[arg(long, default_value = "")]
    style: String,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,
    #[arg(long, default_value = "CUSTOM")]
    prompt_style: String,
    #[arg(long, default_value = "AUTO")]
    lighting: String,
    #[arg(long, default_value = "AUTO")]
    camera: String,
    #[arg(long, default_value = "MEDIUM")]
    quality: String,
    #[arg(long)]
    no_scene_context: bool,
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    seed: i64,
    #[arg(long, default_value_t = 20)]
    steps: u32,
    #[arg(long, default_value_t = 7.5)]
    guidance_scale: f64,
}

impl OptionArgs {
    fn to_options(&self) -> GenerationOptions {
        GenerationOptions {
            prompt: self.prompt.clone(),
            legacy_prompt: self.legacy_prompt.clone(),
            style: self.style.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
            prompt_style: self.prompt_style.clone(),
            lighting: self.lighting.clone(),
            camera: self.camera.clone(),
            quality: self.quality.clone(),
            include_scene_context: !self.no_scene_context,
            seed: self.seed,
            steps: self.steps,
            guidance_scale: self.guidance_scale,
        }
    }
}

#[derive(Debug, Args)]
struct RendererArgs {
    /// External render command; `{output}`, `{width}`, `{height}` and
    /// `{engine}` are substituted.
    #[arg(long)]
    render_cmd: Option<String>,
    /// Image standing in for the renderer's in-memory result.
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long, default_value_t = 0)]
    meshes: usize,
    #[arg(long, default_value_t = 0)]
    lights: usize,
    #[arg(long, default_value_t = 0)]
    cameras: usize,
    #[arg(long)]
    world_lighting: bool,
    #[arg(long)]
    engine: Option<String>,
    /// Project file; artifacts go to `NanoBanana/` next to it.
    #[arg(long)]
    project: Option<PathBuf>,
    #[arg(long)]
    out_dir: Option<PathBuf>,
    #[arg(long)]
    timeout_s: Option<f64>,
}

impl RendererArgs {
    fn renderer(&self) -> Result<CommandRenderer> {
        CommandRenderer::new(
            self.render_cmd.as_deref(),
            self.input.as_deref(),
            self.engine.as_deref(),
            SceneCounts {
                meshes: self.meshes,
                lights: self.lights,
                cameras: self.cameras,
                world_lighting: self.world_lighting,
            },
        )
    }

    fn output_dir(&self) -> PathBuf {
        self.out_dir
            .clone()
            .unwrap_or_else(|| default_output_dir(self.project.as_deref()))
    }

    fn engine_config(&self) -> Result<EngineConfig> {
        let config = EngineConfig::from_env();
        match self.timeout_s {
            None => Ok(config),
            Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
                if !(MIN_TIMEOUT_S..=MAX_TIMEOUT_S).contains(&seconds) {
                    tracing::warn!(
                        "--timeout-s {seconds} is outside {MIN_TIMEOUT_S}..={MAX_TIMEOUT_S}, clamping"
                    );
                }
                Ok(config.with_timeout_secs(seconds))
            }
            Some(seconds) => bail!("--timeout-s must be a positive number of seconds, got {seconds}"),
        }
    }
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    options: OptionArgs,
    #[command(flatten)]
    renderer: RendererArgs,
    /// IMAGE_TO_IMAGE, ANALYSIS or BOTH.
    #[arg(long, default_value = "IMAGE_TO_IMAGE")]
    mode: String,
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    #[command(flatten)]
    renderer: RendererArgs,
    #[arg(long)]
    no_scene_context: bool,
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Debug, Args)]
struct CaptureArgs {
    #[command(flatten)]
    renderer: RendererArgs,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct PromptArgs {
    #[command(flatten)]
    options: OptionArgs,
    #[arg(long)]
    scene_context: Option<String>,
    /// List the accepted tags for every option table.
    #[arg(long)]
    list_tags: bool,
}

#[derive(Debug, Args)]
struct SetKeyArgs {
    key: String,
    /// Write somewhere other than the user config directory.
    #[arg(long)]
    path: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nanobanana error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("NANOBANANA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Analyze(args) => run_analyze(args),
        Command::Capture(args) => run_capture(args),
        Command::Prompt(args) => run_prompt(args),
        Command::SetKey(args) => run_set_key(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let Some(mode) = ServiceMode::from_tag(&args.mode) else {
        bail!("unknown mode '{}' (expected IMAGE_TO_IMAGE, ANALYSIS or BOTH)", args.mode);
    };
    run_pipeline(
        &args.renderer,
        &args.options.to_options(),
        mode,
        args.api_key.as_deref(),
    )
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let options = GenerationOptions {
        include_scene_context: !args.no_scene_context,
        ..GenerationOptions::default()
    };
    run_pipeline(
        &args.renderer,
        &options,
        ServiceMode::Analyze,
        args.api_key.as_deref(),
    )
}

fn run_pipeline(
    renderer_args: &RendererArgs,
    options: &GenerationOptions,
    mode: ServiceMode,
    api_key: Option<&str>,
) -> Result<i32> {
    let config = renderer_args.engine_config()?;
    let output_dir = renderer_args.output_dir();
    let mut renderer = renderer_args.renderer()?;
    let credentials = Credentials::resolve(api_key);
    let pipeline = Pipeline::new(&config, &output_dir)?;

    let outcome = pipeline.run(
        &mut renderer,
        options,
        mode,
        credentials.as_ref(),
        &CancelToken::new(),
    )?;
    print_outcome(&outcome)?;
    Ok(0)
}

fn print_outcome(outcome: &PipelineOutcome) -> Result<()> {
    for warning in &outcome.warnings {
        eprintln!("warning: {warning}");
    }
    let generation = outcome.generation.as_ref().map(|output| match output {
        GenerationOutput::Image { image, artifact } => json!({
            "kind": "image",
            "width": image.image.width(),
            "height": image.image.height(),
            "mime_type": image.mime_type,
            "path": artifact.as_ref().map(|record| record.path.to_string_lossy().to_string()),
        }),
        GenerationOutput::Text { text, debug_artifact } => json!({
            "kind": "text",
            "text": text,
            "debug_path": debug_artifact
                .as_ref()
                .map(|record| record.path.to_string_lossy().to_string()),
        }),
    });
    let analysis = outcome.analysis.as_ref().map(|analysis| {
        json!({
            "text": analysis.text,
            "path": analysis
                .artifact
                .as_ref()
                .map(|record| record.path.to_string_lossy().to_string()),
        })
    });
    let summary = json!({
        "run_id": outcome.run_id,
        "mode": outcome.mode.tag(),
        "capture": {
            "strategy": outcome.capture.strategy,
            "origin": outcome.capture.origin.as_str(),
            "degraded": outcome.capture.degraded,
        },
        "input_path": outcome
            .input_artifact
            .as_ref()
            .map(|record| record.path.to_string_lossy().to_string()),
        "prompt": outcome.prompt,
        "generation": generation,
        "analysis": analysis,
        "warnings": outcome.warnings,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_capture(args: CaptureArgs) -> Result<i32> {
    let config = args.renderer.engine_config()?;
    let mut renderer = args.renderer.renderer()?;
    let capture = CaptureChain::standard(config.capture_width, config.capture_height)
        .capture(&mut renderer)?;
    for failure in &capture.report.failed_attempts {
        eprintln!("capture: {} failed: {}", failure.strategy, failure.message);
    }
    if capture.report.degraded {
        eprintln!("warning: renderer capture failed; wrote a synthetic placeholder");
    }
    if let Some(parent) = args.out.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&args.out, codec::encode_png(&capture.image)?)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    println!(
        "{} ({}x{}, {})",
        args.out.display(),
        capture.image.width(),
        capture.image.height(),
        capture.report.strategy
    );
    Ok(0)
}

fn run_prompt(args: PromptArgs) -> Result<i32> {
    if args.list_tags {
        print_tags();
        return Ok(0);
    }
    let mut warnings = Vec::new();
    let options = args.options.to_options().sanitized(&mut warnings);
    for warning in &warnings {
        eprintln!("warning: {warning}");
    }
    println!("{}", build_prompt(&options, args.scene_context.as_deref()));
    Ok(0)
}

fn print_tags() {
    let aspect: Vec<&str> = AspectRatio::ALL.iter().map(|value| value.tag()).collect();
    let styles: Vec<&str> = PromptStyle::ALL.iter().map(|value| value.tag()).collect();
    let lighting: Vec<&str> = Lighting::ALL.iter().map(|value| value.tag()).collect();
    let cameras: Vec<&str> = CameraAngle::ALL.iter().map(|value| value.tag()).collect();
    let quality: Vec<&str> = Quality::ALL.iter().map(|value| value.tag()).collect();
    println!("aspect-ratio: {}", aspect.join(", "));
    println!("prompt-style: {}", styles.join(", "));
    println!("lighting: {}", lighting.join(", "));
    println!("camera: {}", cameras.join(", "));
    println!("quality: {}", quality.join(", "));
}

fn run_set_key(args: SetKeyArgs) -> Result<i32> {
    let path = match args.path {
        Some(path) => path,
        None => credential_file_path()
            .context("cannot locate a config directory (set XDG_CONFIG_HOME or HOME)")?,
    };
    save_api_key(&path, &args.key)?;
    eprintln!(
        "warning: the key is stored unencrypted in {}",
        path.display()
    );
    println!("{}", path.display());
    Ok(0)
}
