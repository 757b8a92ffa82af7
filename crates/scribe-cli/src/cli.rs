use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "scribe", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Chain worker chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Playback callback refill cap (frames). Larger reduces lock churn but can add latency.
    #[arg(long, default_value_t = 4096)]
    pub refill_max_frames: usize,

    /// Queue buffer target in seconds (per link)
    #[arg(long, default_value_t = 2.0)]
    pub buffer_seconds: f32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local audio file
    Play {
        /// Path to the audio file
        path: PathBuf,

        /// Playback rate multiplier (tempo change without pitch change)
        #[arg(long, default_value_t = 1.0)]
        rate: f64,

        /// Volume factor (1.0 = unity)
        #[arg(long, default_value_t = 1.0)]
        volume: f64,

        /// Start position in seconds
        #[arg(long)]
        seek: Option<f64>,
    },

    /// List output devices and exit
    Devices,
}
