//! File source + decode stage.
//!
//! Uses Symphonia to probe the container (the synchronous part of
//! attaching a source, where duration and stream format come from) and
//! to decode packets into interleaved `f32` on a background thread that
//! feeds the staging link (the decoder's output port).
//!
//! The decode thread is restarted for flushing seeks: Symphonia's
//! format reader seeks to the target, then decoding resumes into the
//! flushed staging link.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Sender;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::engine::BusMessage;
use crate::graph::link::StageLink;
use crate::time::NS_PER_SECOND;

/// Stream facts captured while probing the source.
#[derive(Clone, Debug)]
pub struct ProbedStream {
    pub sample_rate: u32,
    pub channels: usize,
    /// Total duration when the container declares it.
    pub duration_ns: Option<u64>,
    /// Codec label (best-effort, for diagnostics).
    pub codec: Option<String>,
}

/// Probe `path` and return the stream facts.
///
/// This is the blocking part of attaching a source; decode itself runs
/// on the thread spawned by [`spawn_decoder`].
pub fn probe_stream(path: &Path) -> Result<ProbedStream> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track"))?;

    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| anyhow!("unknown channel layout"))?
        .count();
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;

    Ok(ProbedStream {
        sample_rate,
        channels,
        duration_ns: duration_ns_from_codec_params(&track.codec_params),
        codec: codec_name_from_params(&track.codec_params),
    })
}

/// Start a background decoder thread streaming interleaved `f32` from
/// `path` into `staging`, beginning at `start_ns`.
///
/// - Natural end of file closes `staging` (downstream drains, then the
///   sink posts EOS).
/// - Fatal errors are posted as [`BusMessage::Error`] and close
///   `staging`.
/// - A cancelled thread (flushing seek, teardown) exits without closing
///   the link so the next decoder can reuse it.
pub fn spawn_decoder(
    path: PathBuf,
    start_ns: u64,
    staging: Arc<StageLink>,
    cancel: Arc<AtomicBool>,
    bus: Sender<BusMessage>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || match decode_loop(&path, start_ns, &staging, &cancel) {
        Ok(()) => {
            if !cancel.load(Ordering::Relaxed) {
                staging.close();
            }
        }
        Err(e) => {
            tracing::error!("decoder thread error: {e:#}");
            let _ = bus.send(BusMessage::Error(format!("{e:#}")));
            staging.close();
        }
    })
}

/// Decode packets and push interleaved `f32` into `staging`.
fn decode_loop(
    path: &Path,
    start_ns: u64,
    staging: &Arc<StageLink>,
    cancel: &Arc<AtomicBool>,
) -> Result<()> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    if start_ns > 0 {
        let secs = start_ns / NS_PER_SECOND;
        let frac = (start_ns % NS_PER_SECOND) as f64 / NS_PER_SECOND as f64;
        let _ = format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::new(secs, frac),
                track_id: None,
            },
        );
    }

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track"))?;
    let codec_params: CodecParameters = track.codec_params.clone();
    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Ok(());
        }

        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(_) => break, // EOF
        };

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(_) => continue,
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);

        if cancel.load(Ordering::Relaxed) {
            return Ok(());
        }
        staging.push_blocking(sample_buf.samples());
    }

    Ok(())
}

/// Total duration in nanoseconds from codec metadata, if declared.
fn duration_ns_from_codec_params(params: &CodecParameters) -> Option<u64> {
    let frames = params.n_frames?;
    let rate = params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some((u128::from(frames) * u128::from(NS_PER_SECOND) / u128::from(rate)) as u64)
}

/// Best-effort codec label for diagnostics.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;

    #[test]
    fn duration_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ns_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_computes_in_nanoseconds() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_ns_from_codec_params(&params), Some(2_000_000_000));
    }

    #[test]
    fn duration_survives_long_recordings() {
        // 100 hours at 48 kHz must not overflow.
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(48_000 * 3600 * 100);
        assert_eq!(
            duration_ns_from_codec_params(&params),
            Some(360_000 * NS_PER_SECOND)
        );
    }

    #[test]
    fn codec_label_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC".to_string()));
        params.codec = CODEC_TYPE_NULL;
        assert!(codec_name_from_params(&params).is_none());
    }
}
