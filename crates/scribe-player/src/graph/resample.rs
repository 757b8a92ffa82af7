//! Resample stage.
//!
//! Wraps Rubato's streaming sinc resampler to convert chain audio from
//! the decoded sample rate to the output device rate. Runs inline on the
//! chain worker; construction happens at decoder-link time once the
//! source rate is known.

use anyhow::{anyhow, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    calculate_cutoff, Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

/// Streaming sinc resampler over interleaved `f32` chunks.
pub struct ResampleStage {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    out_buf: Vec<f32>,
}

impl ResampleStage {
    /// Build a resampler for `src_rate` → `dst_rate` at `channels`.
    ///
    /// `chunk_frames` is the steady-state input chunk size; smaller
    /// final chunks are handled via partial processing.
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let chunk_frames = chunk_frames.max(1);
        let resampler: Box<dyn Resampler<f32>> = Box::new(
            Async::<f32>::new_sinc(f_ratio, 1.1, &params, chunk_frames, channels, FixedAsync::Input)
                .map_err(|e| anyhow!("resampler init: {e}"))?,
        );

        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            out_buf: vec![0.0; channels * chunk_frames * 3],
        })
    }

    /// Drop the carried sinc history. Used by flushing seeks so filter
    /// state from before the seek cannot color the new segment.
    pub fn reset(&mut self) {
        self.resampler.reset();
    }

    /// Resample one interleaved chunk; returns the produced samples.
    ///
    /// `input` may hold fewer than the configured chunk frames (stream
    /// tail); whole frames only.
    pub fn process(&mut self, input: &[f32]) -> Result<&[f32]> {
        let frames = input.len() / self.channels;
        if frames == 0 {
            return Ok(&[]);
        }

        let input_adapter = InterleavedSlice::new(input, self.channels, frames)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;

        let out_capacity_frames = self.out_buf.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.out_buf, self.channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: (frames < self.chunk_frames).then_some(frames),
        };

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process: {e}"))?;

        Ok(&self.out_buf[..nbr_out * self.channels])
    }
}
