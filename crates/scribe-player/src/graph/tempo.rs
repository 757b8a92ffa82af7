//! Tempo-scaling stage: playback speed changes without pitch change.
//!
//! Overlap-add with a Hann window at 50% overlap. The synthesis hop is
//! fixed at half a window; the analysis hop is `hop * rate`, so rate
//! values above 1.0 skip through the input faster (shorter output) and
//! values below 1.0 dwell on it (longer output), while the grain content
//! keeps the original pitch. Hann at 50% overlap sums to unity, so rate
//! 1.0 reconstructs the input.

/// Slowest/fastest tempo factor accepted by the scaler.
pub const MIN_RATE: f64 = 1.0 / 16.0;
pub const MAX_RATE: f64 = 16.0;

/// Streaming overlap-add tempo scaler.
///
/// Owned by the chain worker; the rate is re-read every chunk so rate
/// changes take effect on the next playback tick.
pub struct TempoScaler {
    channels: usize,
    window: usize,
    hop: usize,
    hann: Vec<f32>,
    /// Interleaved input FIFO.
    pending: Vec<f32>,
    /// Windowed second half of the previous grain, waiting to be
    /// overlap-added with the next one.
    tail: Vec<f32>,
    /// Fractional read position (frames) into `pending`.
    read_pos: f64,
    primed: bool,
}

impl TempoScaler {
    /// `window_frames` is rounded up to an even value.
    pub fn new(channels: usize, window_frames: usize) -> Self {
        let window = (window_frames.max(4) + 1) & !1;
        let hop = window / 2;
        let hann = (0..window)
            .map(|i| {
                let x = (i as f32) / (window as f32);
                0.5 - 0.5 * (std::f32::consts::TAU * x).cos()
            })
            .collect();
        Self {
            channels,
            window,
            hop,
            hann,
            pending: Vec::new(),
            tail: vec![0.0; hop * channels],
            read_pos: 0.0,
            primed: false,
        }
    }

    /// Feed interleaved input and append scaled output to `out`.
    ///
    /// `rate` is clamped to `[MIN_RATE, MAX_RATE]` on its absolute
    /// value; direction is handled upstream.
    pub fn process(&mut self, input: &[f32], rate: f64, out: &mut Vec<f32>) {
        self.pending.extend_from_slice(input);

        let ch = self.channels;
        let hop_in = self.hop as f64 * rate.abs().clamp(MIN_RATE, MAX_RATE);

        loop {
            let start = self.read_pos.floor() as usize;
            if (start + self.window) * ch > self.pending.len() {
                break;
            }

            for i in 0..self.hop {
                let base = (start + i) * ch;
                for c in 0..ch {
                    let sample = self.pending[base + c];
                    if self.primed {
                        out.push(self.tail[i * ch + c] + sample * self.hann[i]);
                    } else {
                        // First grain after a flush: nothing to overlap
                        // with, emit the first half unweighted.
                        out.push(sample);
                    }
                }
            }

            for i in 0..self.hop {
                let base = (start + self.hop + i) * ch;
                for c in 0..ch {
                    self.tail[i * ch + c] = self.pending[base + c] * self.hann[self.hop + i];
                }
            }
            self.primed = true;
            self.read_pos += hop_in;

            // Frames before the read position are consumed; rebase.
            let drop_frames = (self.read_pos.floor() as usize).min(self.pending.len() / ch);
            if drop_frames > 0 {
                self.pending.drain(..drop_frames * ch);
                self.read_pos -= drop_frames as f64;
            }
        }
    }

    /// Emit the held tail (a natural Hann fade-out) and reset.
    ///
    /// Call at end of stream, after the final `process`.
    pub fn drain(&mut self, out: &mut Vec<f32>) {
        if self.primed {
            out.extend_from_slice(&self.tail);
        }
        self.flush();
    }

    /// Discard all internal state. Used by flushing seeks.
    pub fn flush(&mut self) {
        self.pending.clear();
        self.tail.iter_mut().for_each(|s| *s = 0.0);
        self.read_pos = 0.0;
        self.primed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(channels: usize, input: &[f32], rate: f64, chunk: usize) -> Vec<f32> {
        let mut scaler = TempoScaler::new(channels, 64);
        let mut out = Vec::new();
        for piece in input.chunks(chunk * channels) {
            scaler.process(piece, rate, &mut out);
        }
        scaler.drain(&mut out);
        out
    }

    #[test]
    fn unity_rate_reconstructs_a_constant_signal() {
        let input = vec![0.5f32; 2048];
        let out = run(1, &input, 1.0, 256);
        assert_eq!(out.len(), 2048);
        // Everything before the final fade-out tail is the input level.
        for &s in &out[..out.len() - 32] {
            assert!((s - 0.5).abs() < 1e-3, "sample {s}");
        }
    }

    #[test]
    fn double_rate_roughly_halves_the_output() {
        let input = vec![0.25f32; 4096];
        let out = run(1, &input, 2.0, 512);
        let expected = input.len() / 2;
        assert!(
            (out.len() as i64 - expected as i64).unsigned_abs() <= 128,
            "got {} want ~{expected}",
            out.len()
        );
    }

    #[test]
    fn half_rate_roughly_doubles_the_output() {
        let input = vec![0.25f32; 2048];
        let out = run(1, &input, 0.5, 512);
        let expected = input.len() * 2;
        assert!(
            (out.len() as i64 - expected as i64).unsigned_abs() <= 128,
            "got {} want ~{expected}",
            out.len()
        );
    }

    #[test]
    fn negative_rate_scales_like_its_magnitude() {
        let input = vec![0.25f32; 2048];
        let forward = run(1, &input, 2.0, 512);
        let backward = run(1, &input, -2.0, 512);
        assert_eq!(forward.len(), backward.len());
    }

    #[test]
    fn stereo_frames_keep_channel_identity() {
        let mut input = Vec::new();
        for _ in 0..1024 {
            input.push(0.25);
            input.push(-0.25);
        }
        let out = run(2, &input, 1.0, 128);
        for pair in out[..out.len() - 64].chunks(2) {
            assert!(pair[0] > 0.0 && pair[1] < 0.0, "pair {pair:?}");
        }
    }

    #[test]
    fn flush_resets_priming() {
        let mut scaler = TempoScaler::new(1, 64);
        let mut out = Vec::new();
        scaler.process(&vec![0.5; 256], 1.0, &mut out);
        assert!(!out.is_empty());

        scaler.flush();
        let mut out2 = Vec::new();
        // Less than a window of input: nothing can be emitted yet.
        scaler.process(&vec![0.5; 32], 1.0, &mut out2);
        assert!(out2.is_empty());
    }
}
