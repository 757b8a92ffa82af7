//! Scribe, a small CLI front end for the scribe-player engine.
//!
//! Opens an audio file, waits for the pipeline to report it ready, then
//! plays it with the requested rate, volume, and start position. The
//! event loop pumps the player and prints a position/duration line once
//! a second, the same cooperative pattern a transcription UI would use
//! from its main loop.

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Parser;
use scribe_player::graph::sink::list_output_devices;
use scribe_player::time::NS_PER_SECOND;
use scribe_player::{GraphConfig, Player, PlayerEvent, Timecode};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match &args.cmd {
        cli::Command::Devices => {
            for (i, name) in list_output_devices()?.iter().enumerate() {
                println!("#{i}: {name}");
            }
            Ok(())
        }
        cli::Command::Play {
            path,
            rate,
            volume,
            seek,
        } => play_file(&args, path, *rate, *volume, *seek),
    }
}

fn play_file(
    args: &cli::Args,
    path: &Path,
    rate: f64,
    volume: f64,
    seek_secs: Option<f64>,
) -> Result<()> {
    let config = GraphConfig {
        device: args.device.clone(),
        chunk_frames: args.chunk_frames,
        refill_max_frames: args.refill_max_frames,
        buffer_seconds: args.buffer_seconds,
        ..GraphConfig::default()
    };
    let mut player = Player::with_default_output(config)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        let _ = ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed));
    }

    player.open_path(path)?;

    let mut last_tick = Instant::now();
    loop {
        if stop.load(Ordering::Relaxed) {
            player.pause()?;
            tracing::info!("interrupted");
            return Ok(());
        }

        for event in player.pump() {
            match event {
                PlayerEvent::Ready(stream) => {
                    tracing::info!(%stream, "stream ready");
                    if (volume - 1.0).abs() > f64::EPSILON {
                        player.set_volume(volume);
                    }
                    if let Some(secs) = seek_secs {
                        let ns = (secs.max(0.0) * NS_PER_SECOND as f64) as u64;
                        player.set_position(ns)?;
                    }
                    if (rate - 1.0).abs() > f64::EPSILON {
                        player.set_rate(rate)?;
                    }
                    player.play()?;
                }
                PlayerEvent::DurationChanged => {
                    tracing::debug!(
                        duration = %Timecode::from_ns(player.duration()),
                        "duration updated"
                    );
                }
                PlayerEvent::Ended => {
                    println!("done: {}", Timecode::from_ns(player.duration()));
                    return Ok(());
                }
                PlayerEvent::DecodeError(detail) => {
                    bail!("playback failed: {detail}");
                }
            }
        }

        if player.is_playing() && last_tick.elapsed() >= Duration::from_secs(1) {
            let position = player.position().unwrap_or(0);
            let duration = player.duration();
            println!(
                "{} / {}",
                Timecode::from_ns(position),
                Timecode::from_ns(duration)
            );
            last_tick = Instant::now();
        }

        thread::sleep(Duration::from_millis(50));
    }
}
