mod args;
mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vcompress_core::{
    load_config, load_config_from_env, validate_config, Config, ConversionController,
    EngineHandle, FfmpegEngine, JobOutcome, Resolution, SourceAsset,
};

use args::Args;

/// Config file picked up from the working directory when none is given
const DEFAULT_CONFIG_FILE: &str = "vcompress.toml";

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    // Initialize logging; stdout is reserved for the output path
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = resolve_config(args.config.clone())?;
    validate_config(&config).context("Configuration validation failed")?;

    let resolution = args.resolution.unwrap_or(config.output.default_resolution);
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output.directory.clone());

    // Start loading the engine before reading the input
    let engine = Arc::new(FfmpegEngine::new(config.engine.clone()));
    let handle = EngineHandle::launch(engine.clone());
    let controller =
        ConversionController::with_resolution(handle, config.output.default_resolution);

    let result = convert(&controller, &args, resolution, &output_dir).await;

    // Initialization may still be creating the work directory
    let _ = controller.engine().wait_ready().await;
    if let Err(e) = engine.cleanup().await {
        warn!("Failed to clean up engine work directory: {}", e);
    }

    result
}

/// Selects the input, runs one job and saves its result.
async fn convert(
    controller: &ConversionController,
    args: &Args,
    resolution: Resolution,
    output_dir: &Path,
) -> Result<()> {
    let source = SourceAsset::from_path(&args.input)
        .await
        .with_context(|| format!("Failed to read input {:?}", args.input))?;

    controller.select_file(source);
    controller.set_resolution(resolution)?;

    let renderer = tokio::spawn(render::follow(controller.subscribe()));

    match controller.start_conversion().await {
        Ok(JobOutcome::Succeeded(_)) => {
            let _ = renderer.await;
            let path = controller
                .save_result(output_dir)
                .await
                .with_context(|| format!("Failed to save result to {:?}", output_dir))?;
            println!("{}", path.display());
            Ok(())
        }
        Ok(JobOutcome::Failed(failure)) => {
            let _ = renderer.await;
            Err(anyhow!(failure.message))
        }
        Ok(JobOutcome::Superseded) => {
            renderer.abort();
            Err(anyhow!("Conversion was superseded"))
        }
        Err(e) => {
            renderer.abort();
            Err(e.into())
        }
    }
}

/// Explicit path (flag, then `VCOMPRESS_CONFIG`), else `vcompress.toml` if
/// present, else defaults. Environment overrides apply in every case.
fn resolve_config(flag: Option<PathBuf>) -> Result<Config> {
    let explicit = flag.or_else(|| std::env::var("VCOMPRESS_CONFIG").ok().map(PathBuf::from));

    let config_path = match explicit {
        Some(path) => path,
        None => {
            let local = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !local.exists() {
                info!("No configuration file, using defaults");
                return load_config_from_env().context("Failed to load configuration");
            }
            local
        }
    };

    info!("Loading configuration from {:?}", config_path);
    load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))
}
