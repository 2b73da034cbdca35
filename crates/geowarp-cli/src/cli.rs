use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use geowarp::gpu::GpuPower;

#[derive(Parser, Debug)]
#[command(
    name = "geowarp",
    author,
    version,
    about = "Warp geo-referenced images into planet-surface textures"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch, warp and export every configured layer as PNG.
    Render(RenderArgs),
    /// Print the extent uniforms of every configured layer.
    Extents(ExtentsArgs),
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Layer configuration file.
    #[arg(long, short, value_name = "FILE", env = "GEOWARP_CONFIG")]
    pub config: PathBuf,

    /// Directory receiving `<layer>.png` files.
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,

    /// Give up on layers that are not ready after this many frames.
    #[arg(long, value_name = "N", default_value_t = 600, value_parser = parse_frame_limit)]
    pub max_frames: u32,

    /// Only render the named layers (repeatable).
    #[arg(long = "layer", value_name = "NAME")]
    pub layers: Vec<String>,

    /// Override the configured GPU power preference (`low` or `high`).
    #[arg(long, value_name = "PREF", value_parser = parse_power)]
    pub power: Option<GpuPower>,
}

#[derive(Args, Debug)]
pub struct ExtentsArgs {
    /// Layer configuration file.
    #[arg(long, short, value_name = "FILE", env = "GEOWARP_CONFIG")]
    pub config: PathBuf,

    /// Emit JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_frame_limit(value: &str) -> Result<u32, String> {
    let frames: u32 = value
        .trim()
        .parse()
        .map_err(|err| format!("invalid frame count '{value}': {err}"))?;
    if frames == 0 {
        return Err("frame limit must be at least 1".into());
    }
    Ok(frames)
}

pub fn parse_power(value: &str) -> Result<GpuPower, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "low" | "low-power" => Ok(GpuPower::Low),
        "high" | "high-performance" => Ok(GpuPower::High),
        other => Err(format!("unknown power preference '{other}'; expected low or high")),
    }
}
