// fluxgen-bin - CLI for the persistent generation engine

use clap::Parser;
use fluxgen::{Engine, FluxBackend, GenParams, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate images with a persistent Flux engine", long_about = None)]
struct Args {
    /// Text prompt describing the image to generate
    #[arg(short, long)]
    prompt: String,

    /// Output file path (PNG format)
    #[arg(short, long, default_value = "output.png")]
    output: PathBuf,

    /// Model directory (falls back to FLUXGEN_MODEL_DIR, then "flux-klein-model")
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Image width in pixels
    #[arg(short, long, default_value = "512")]
    width: u32,

    /// Image height in pixels
    #[arg(long, default_value = "512")]
    height: u32,

    /// Number of denoising steps
    #[arg(short, long, default_value = "20")]
    num_steps: usize,

    /// Guidance scale
    #[arg(short, long, default_value = "7.5")]
    guidance: f32,

    /// Random seed for reproducibility (omit for a fresh seed per run)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Source image to rework; switches to image-to-image
    #[arg(short, long)]
    init_image: Option<PathBuf>,

    /// How strongly the source image constrains the output (image-to-image)
    #[arg(long, default_value = "0.75")]
    strength: f32,

    /// Memory-map model weights (lower RAM, slower)
    #[arg(long)]
    mmap: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    // Load .env if present (model dir and log filter can live there)
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("fluxgen={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let model_dir = args
        .model_dir
        .or_else(|| std::env::var("FLUXGEN_MODEL_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("flux-klein-model"));

    tracing::info!("Model dir: {}", model_dir.display());
    tracing::info!("Output: {}", args.output.display());

    let mut engine = Engine::<FluxBackend>::create(&model_dir, args.mmap)?;

    let params = GenParams {
        width: args.width,
        height: args.height,
        steps: args.num_steps,
        guidance: args.guidance,
        seed: args.seed,
        strength: args.strength,
    };

    let result = match &args.init_image {
        Some(init_image) => {
            engine.img2img_to_file(&args.prompt, init_image, &params, &args.output)
        }
        None => engine.txt2img_to_file(&args.prompt, &params, &args.output),
    };

    match result {
        Ok(generation) => {
            println!("Image saved to: {}", args.output.display());
            println!("Seed: {}", generation.seed);
            Ok(())
        }
        Err(err) => {
            eprintln!(
                "Generation failed (status {}): {}",
                err.status(),
                engine.last_error()
            );
            Err(err)
        }
    }
}
