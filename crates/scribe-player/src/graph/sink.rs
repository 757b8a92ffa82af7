//! Output sink stage (CPAL output stream) and device selection.
//!
//! The callback:
//! - refills a small local buffer from the out link without blocking
//! - converts `f32` samples to the device sample format
//! - counts played frames for the position clock
//! - posts EOS on the bus once the out link is drained
//!
//! Pause is a flag the callback honors by emitting silence without
//! draining the link, so resuming continues exactly where playback
//! stopped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};
use crossbeam_channel::Sender;

use crate::engine::BusMessage;
use crate::graph::link::StageLink;

/// Pick a CPAL output device.
///
/// - If `needle` is `Some`, chooses the first output device whose name
///   contains the substring (case-insensitive).
/// - Otherwise, returns the host default output device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// List output device names for the current host.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.output_devices().context("No output devices")?;
    let mut names = Vec::new();
    for d in devices {
        names.push(d.description()?.to_string());
    }
    Ok(names)
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

/// Shared handles the output callback operates on.
pub struct SinkParams {
    /// Out link carrying interleaved `f32` at the device rate and
    /// channel count.
    pub out: Arc<StageLink>,
    /// When `true`, the callback outputs silence and does not drain the
    /// link.
    pub paused: Arc<AtomicBool>,
    /// Incremented by the number of output frames produced.
    pub played_frames: Arc<AtomicU64>,
    /// Ensures EOS is posted at most once per stream segment.
    pub eos_sent: Arc<AtomicBool>,
    pub bus: Sender<BusMessage>,
    /// Maximum number of frames to pull from the link per refill.
    pub refill_max_frames: usize,
}

/// Build a CPAL output stream that plays audio from the out link.
///
/// The callback never blocks on the link; underruns are filled with
/// silence. When the link is both closed and empty, a single
/// [`BusMessage::Eos`] is posted.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    params: SinkParams,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, params),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, params),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, params),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, params),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Local refill buffer state for the CPAL callback.
struct SinkState {
    pos: usize,
    src: Vec<f32>,
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    params: SinkParams,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let refill_max_frames = params.refill_max_frames.max(1);

    let state = Arc::new(Mutex::new(SinkState {
        pos: 0,
        src: Vec::new(),
    }));

    let out = params.out;
    let paused = params.paused;
    let played_frames = params.played_frames;
    let eos_sent = params.eos_sent;
    let bus = params.bus;

    let err_bus = bus.clone();
    let err_fn = move |err| {
        tracing::warn!("output stream error: {err}");
        let _ = err_bus.send(BusMessage::Error(format!("output stream: {err}")));
    };

    let state_cb = state.clone();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if paused.load(Ordering::Relaxed) {
                data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                return;
            }

            let mut st = match state_cb.lock() {
                Ok(st) => st,
                Err(_) => return,
            };

            let frames = data.len() / channels;
            let mut filled_frames = 0usize;

            for frame in 0..frames {
                if st.pos >= st.src.len() {
                    st.pos = 0;
                    st.src.clear();
                    if let Some(v) = out.try_pop(refill_max_frames) {
                        st.src = v;
                    } else {
                        // No more audio ready; fill the rest with silence.
                        for idx in (frame * channels)..data.len() {
                            data[idx] = <T as cpal::Sample>::from_sample::<f32>(0.0);
                        }
                        if out.is_drained() && !eos_sent.swap(true, Ordering::Relaxed) {
                            let _ = bus.send(BusMessage::Eos);
                        }
                        break;
                    }
                }
                for ch in 0..channels {
                    let sample_f32 = st.src.get(st.pos + ch).copied().unwrap_or(0.0);
                    data[frame * channels + ch] =
                        <T as cpal::Sample>::from_sample::<f32>(sample_f32);
                }
                st.pos += channels;
                filled_frames += 1;
            }

            if filled_frames > 0 {
                played_frames.fetch_add(filled_frames as u64, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }
}
