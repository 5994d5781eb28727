use std::path::PathBuf;

use clap::Parser;
use vcompress_core::Resolution;

/// Compress a video to 480p, 720p or 1080p H.264 with ffmpeg.
#[derive(Debug, Parser)]
#[command(name = "vcompress", version)]
pub struct Args {
    /// Video file to compress
    pub input: PathBuf,

    /// Output height: 480, 720 or 1080 (defaults to the configured resolution)
    #[arg(short, long)]
    pub resolution: Option<Resolution>,

    /// Directory the compressed video is written to
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Configuration file (also read from VCOMPRESS_CONFIG)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
