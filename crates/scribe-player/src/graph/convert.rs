//! Channel-mapping convert stage.
//!
//! Maps interleaved frames from the decoded channel layout to the output
//! device layout before resampling, so every later stage runs at the
//! device channel count.
//!
//! Mapping rules:
//! - mono → stereo: duplicate channel 0
//! - stereo → mono: average L/R
//! - same count: pass-through
//! - other layouts: best-effort clamp to available channels

/// Map interleaved samples from `src_channels` to `dst_channels`.
///
/// Trailing partial frames in `input` are dropped.
pub fn map_channels(input: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    if src_channels == 0 || dst_channels == 0 {
        return Vec::new();
    }
    let frames = input.len() / src_channels;
    if src_channels == dst_channels {
        return input[..frames * src_channels].to_vec();
    }

    let mut out = Vec::with_capacity(frames * dst_channels);
    for frame in 0..frames {
        let base = frame * src_channels;
        for dst_ch in 0..dst_channels {
            let sample = match (src_channels, dst_channels) {
                (1, _) => input[base],
                (2, 1) => 0.5 * (input[base] + input[base + 1]),
                _ => input[base + dst_ch.min(src_channels - 1)],
            };
            out.push(sample);
        }
    }
    out
}
