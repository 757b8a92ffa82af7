//! Chain worker: the processing stages between decoder and sink.
//!
//! One thread per linked session. Pops fixed chunks from the staging
//! link and runs them through convert → resample → gain → tempo before
//! pushing the result to the out link. Backpressure on the out link
//! paces the whole chain (and, through the staging link, the decoder).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use anyhow::Result;

use crate::graph::convert::map_channels;
use crate::graph::gain::{AtomicFactor, apply_gain};
use crate::graph::link::StageLink;
use crate::graph::resample::ResampleStage;
use crate::graph::tempo::TempoScaler;

/// Handles and fixed parameters for one chain worker.
pub(crate) struct ChainParams {
    pub staging: Arc<StageLink>,
    pub out: Arc<StageLink>,
    pub src_rate: u32,
    pub dst_rate: u32,
    pub src_channels: usize,
    pub dst_channels: usize,
    pub chunk_frames: usize,
    pub tempo_window_frames: usize,
    /// Volume factor, read per chunk.
    pub gain: Arc<AtomicFactor>,
    /// Tempo rate factor, read per chunk.
    pub tempo: Arc<AtomicFactor>,
    /// Bumped by flushing seeks; a change makes the worker drop its
    /// overlap state so no pre-seek audio bleeds into the new segment.
    pub epoch: Arc<AtomicU64>,
}

pub(crate) fn spawn_chain(params: ChainParams) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        if let Err(e) = run_chain(&params) {
            tracing::error!("chain worker error: {e:#}");
        }
        params.out.close();
    })
}

fn run_chain(p: &ChainParams) -> Result<()> {
    let mut resampler = if p.src_rate != p.dst_rate {
        Some(ResampleStage::new(
            p.src_rate,
            p.dst_rate,
            p.dst_channels,
            p.chunk_frames,
        )?)
    } else {
        None
    };
    let mut scaler = TempoScaler::new(p.dst_channels, p.tempo_window_frames);
    let mut last_epoch = p.epoch.load(Ordering::Relaxed);

    while let Some(chunk) = p.staging.pop_exact(p.chunk_frames) {
        let epoch = p.epoch.load(Ordering::Relaxed);
        if epoch != last_epoch {
            last_epoch = epoch;
            reset_stages(&mut resampler, &mut scaler);
        }
        let scaled = process_chunk(p, &mut resampler, &mut scaler, &chunk)?;

        // A flushing seek may have landed after the pop; the pre-seek
        // result must never reach the sink. The cancellable push covers
        // the same race while blocked on a full link.
        if p.epoch.load(Ordering::Relaxed) != epoch {
            last_epoch = p.epoch.load(Ordering::Relaxed);
            reset_stages(&mut resampler, &mut scaler);
            continue;
        }
        if !scaled.is_empty()
            && !p
                .out
                .push_while(&scaled, || p.epoch.load(Ordering::Relaxed) == epoch)
        {
            if p.out.is_closed() {
                return Ok(());
            }
            last_epoch = p.epoch.load(Ordering::Relaxed);
            reset_stages(&mut resampler, &mut scaler);
            continue;
        }
        if p.out.is_closed() {
            return Ok(());
        }
    }

    // Stream tail: whatever is left after the last full chunk.
    while let Some(tail) = p.staging.pop_up_to(p.chunk_frames) {
        let epoch = p.epoch.load(Ordering::Relaxed);
        if epoch != last_epoch {
            last_epoch = epoch;
            reset_stages(&mut resampler, &mut scaler);
        }
        let scaled = process_chunk(p, &mut resampler, &mut scaler, &tail)?;
        if !scaled.is_empty() {
            p.out.push_blocking(&scaled);
        }
    }

    let mut fade = Vec::new();
    scaler.drain(&mut fade);
    if !fade.is_empty() {
        p.out.push_blocking(&fade);
    }
    Ok(())
}

/// Drop all carried stage state after a flushing seek.
fn reset_stages(resampler: &mut Option<ResampleStage>, scaler: &mut TempoScaler) {
    scaler.flush();
    if let Some(r) = resampler.as_mut() {
        r.reset();
    }
}

fn process_chunk(
    p: &ChainParams,
    resampler: &mut Option<ResampleStage>,
    scaler: &mut TempoScaler,
    chunk: &[f32],
) -> Result<Vec<f32>> {
    let mapped = map_channels(chunk, p.src_channels, p.dst_channels);

    let mut samples = match resampler {
        Some(r) => r.process(&mapped)?.to_vec(),
        None => mapped,
    };

    apply_gain(&mut samples, p.gain.get() as f32);

    let mut scaled = Vec::with_capacity(samples.len() * 2);
    scaler.process(&samples, p.tempo.get(), &mut scaled);
    Ok(scaled)
}
