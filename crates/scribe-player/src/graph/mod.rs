//! Pipeline graph construction and the production engine.
//!
//! [`AudioGraph`] owns the output device, the bus, and at most one
//! *session*: the decoder thread, chain worker, and CPAL stream playing
//! a single source file. Sessions are built when the transport leaves
//! `Null`/`Ready` and torn down when it returns.
//!
//! The decoder's output format is announced on the bus as
//! [`BusMessage::PadAdded`] once the container has been probed; the
//! owner links it via [`PlaybackEngine::link_decoder`], which builds the
//! out link, spawns the chain worker, and starts the output stream.

mod chain;
pub mod convert;
pub mod gain;
pub mod link;
pub mod resample;
pub mod sink;
pub mod source;
pub mod tempo;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::engine::{
    BusMessage, DecoderPad, LinkOutcome, PlaybackEngine, Query, QueryPending, SeekTarget,
    TransportState,
};
use crate::error::PlayerError;
use crate::graph::gain::AtomicFactor;
use crate::graph::link::{capacity_for, StageLink};
use crate::graph::source::ProbedStream;
use crate::time::NS_PER_SECOND;

/// Tuning knobs for graph construction.
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// Output device substring (case-insensitive); `None` uses the host
    /// default.
    pub device: Option<String>,
    /// Frames per chain-worker chunk.
    pub chunk_frames: usize,
    /// Maximum frames the output callback pulls per refill.
    pub refill_max_frames: usize,
    /// Buffered seconds per link.
    pub buffer_seconds: f32,
    /// Overlap-add window for the tempo stage, in output frames.
    pub tempo_window_frames: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            device: None,
            chunk_frames: 1024,
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
            tempo_window_frames: 2048,
        }
    }
}

/// Live playback state for one source file.
struct Session {
    probed: ProbedStream,
    staging: Arc<StageLink>,
    out: Option<Arc<StageLink>>,
    decoder: Option<DecoderHandle>,
    chain: Option<JoinHandle<()>>,
    stream: Option<cpal::Stream>,
    paused: Arc<AtomicBool>,
    eos_sent: Arc<AtomicBool>,
    /// Output frames produced by the sink since the last seek.
    played_frames: Arc<AtomicU64>,
    /// Bumped on flushing seeks so the chain worker drops overlap state.
    epoch: Arc<AtomicU64>,
    /// Stream offset the position clock counts from.
    base_ns: u64,
    duration_ns: Option<u64>,
    linked: bool,
}

struct DecoderHandle {
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Production [`PlaybackEngine`] backed by Symphonia, Rubato, and CPAL.
///
/// Owns `cpal::Stream` handles, so the graph must stay on the thread it
/// was created on; the engine contract is single-threaded control
/// anyway.
pub struct AudioGraph {
    config: GraphConfig,
    device: cpal::Device,
    device_name: String,
    stream_config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    bus_tx: Sender<BusMessage>,
    bus_rx: Receiver<BusMessage>,
    state: TransportState,
    location: Option<PathBuf>,
    gain: Arc<AtomicFactor>,
    tempo: Arc<AtomicFactor>,
    session: Option<Session>,
}

impl AudioGraph {
    /// Open the output device and build an idle graph.
    ///
    /// Fails with [`PlayerError::EngineUnavailable`] when no usable
    /// output device exists.
    pub fn new(config: GraphConfig) -> Result<Self, PlayerError> {
        let host = cpal::default_host();
        let device = sink::pick_device(&host, config.device.as_deref())
            .map_err(|e| PlayerError::EngineUnavailable(format!("{e:#}")))?;
        let device_name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let supported = device
            .default_output_config()
            .map_err(|e| PlayerError::EngineUnavailable(format!("{e:#}")))?;
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.config();

        tracing::info!(
            device = %device_name,
            rate = stream_config.sample_rate,
            channels = stream_config.channels,
            format = ?sample_format,
            "output device opened"
        );

        let (bus_tx, bus_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            config,
            device,
            device_name,
            stream_config,
            sample_format,
            bus_tx,
            bus_rx,
            state: TransportState::Null,
            location: None,
            gain: Arc::new(AtomicFactor::new(1.0)),
            tempo: Arc::new(AtomicFactor::new(1.0)),
            session: None,
        })
    }

    /// Name of the selected output device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Probe the attached location and start decoding at `start_ns`.
    ///
    /// Posts `PadAdded` (and `DurationChanged` when the container
    /// declares a duration); probe failures post `Error` instead and
    /// leave the graph without a session.
    fn start_session_at(&mut self, start_ns: u64) {
        let Some(path) = self.location.clone() else {
            return;
        };

        let probed = match source::probe_stream(&path) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %path.display(), "probe failed: {e:#}");
                let _ = self.bus_tx.send(BusMessage::Error(format!("{e:#}")));
                return;
            }
        };

        tracing::info!(
            path = %path.display(),
            codec = probed.codec.as_deref().unwrap_or("?"),
            rate = probed.sample_rate,
            channels = probed.channels,
            "source attached"
        );

        let staging = Arc::new(StageLink::new(
            probed.channels,
            capacity_for(
                probed.sample_rate,
                probed.channels,
                self.config.buffer_seconds,
            ),
        ));
        let cancel = Arc::new(AtomicBool::new(false));
        let join = source::spawn_decoder(
            path,
            start_ns,
            staging.clone(),
            cancel.clone(),
            self.bus_tx.clone(),
        );

        let duration_ns = probed.duration_ns;
        let pad = DecoderPad {
            media_type: "audio/x-raw".to_string(),
            sample_rate: probed.sample_rate,
            channels: probed.channels,
        };

        self.session = Some(Session {
            probed,
            staging,
            out: None,
            decoder: Some(DecoderHandle { cancel, join }),
            chain: None,
            stream: None,
            paused: Arc::new(AtomicBool::new(self.state != TransportState::Playing)),
            eos_sent: Arc::new(AtomicBool::new(false)),
            played_frames: Arc::new(AtomicU64::new(0)),
            epoch: Arc::new(AtomicU64::new(0)),
            base_ns: start_ns,
            duration_ns,
            linked: false,
        });

        let _ = self.bus_tx.send(BusMessage::PadAdded(pad));
        if duration_ns.is_some() {
            let _ = self.bus_tx.send(BusMessage::DurationChanged);
        }
    }

    /// Stop all session threads and the output stream.
    fn teardown_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if let Some(dec) = &session.decoder {
            dec.cancel.store(true, Ordering::Relaxed);
        }
        session.staging.close();
        if let Some(out) = &session.out {
            out.close();
        }
        // Stop the callback before joining the workers.
        drop(session.stream.take());
        if let Some(dec) = session.decoder.take() {
            let _ = dec.join.join();
        }
        if let Some(chain) = session.chain.take() {
            let _ = chain.join();
        }
        tracing::debug!("session torn down");
    }

    /// Current playback offset, clamped to the duration when known.
    fn position_ns(&self) -> Option<u64> {
        let session = self.session.as_ref()?;
        let played = session.played_frames.load(Ordering::Relaxed);
        let rate = self
            .tempo
            .get()
            .abs()
            .clamp(tempo::MIN_RATE, tempo::MAX_RATE);
        Some(clock_position_ns(
            session.base_ns,
            played,
            rate,
            self.stream_config.sample_rate,
            session.duration_ns,
        ))
    }

    /// Restart the decode stage at `start_ns`, flushing buffered audio.
    fn restart_decoder_at(&mut self, start_ns: u64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(path) = self.location.clone() else {
            return;
        };

        if let Some(dec) = session.decoder.take() {
            dec.cancel.store(true, Ordering::Relaxed);
            // Unblock a decoder waiting on a full link, then wait for it
            // to exit so its in-flight chunk cannot land post-flush.
            session.staging.flush();
            let _ = dec.join.join();
        }
        // Epoch before the final flushes: a chain worker still holding a
        // pre-seek chunk observes the bump no later than the wakeup the
        // flush delivers, and drops the chunk instead of pushing it.
        session.epoch.fetch_add(1, Ordering::Relaxed);
        session.staging.flush();
        if let Some(out) = &session.out {
            out.flush();
        }
        session.eos_sent.store(false, Ordering::Relaxed);
        session.played_frames.store(0, Ordering::Relaxed);
        session.base_ns = start_ns;

        let cancel = Arc::new(AtomicBool::new(false));
        let join = source::spawn_decoder(
            path,
            start_ns,
            session.staging.clone(),
            cancel.clone(),
            self.bus_tx.clone(),
        );
        session.decoder = Some(DecoderHandle { cancel, join });
    }
}

impl PlaybackEngine for AudioGraph {
    fn set_location(&mut self, path: &Path) -> Result<(), PlayerError> {
        self.teardown_session();
        self.location = Some(path.to_path_buf());
        Ok(())
    }

    fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    fn set_state(&mut self, state: TransportState) -> Result<(), PlayerError> {
        if state == self.state {
            return Ok(());
        }
        tracing::debug!(from = ?self.state, to = ?state, "transport transition");

        match state {
            TransportState::Null | TransportState::Ready => {
                self.teardown_session();
            }
            TransportState::Playing | TransportState::Paused => {
                self.state = state;
                if self.session.is_none() {
                    self.start_session_at(0);
                }
                if let Some(session) = &self.session {
                    session
                        .paused
                        .store(state == TransportState::Paused, Ordering::Relaxed);
                }
            }
        }
        self.state = state;
        Ok(())
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn seek(&mut self, rate: f64, target: SeekTarget) -> Result<(), PlayerError> {
        // Resolve the held position before the new rate is stored: the
        // played frames were produced under the old factor and must be
        // scaled by it, not by the rate this seek is switching to.
        let start_ns = match target {
            SeekTarget::Absolute(ns) => ns,
            SeekTarget::Current => self.position_ns().unwrap_or(0),
        };
        self.tempo.set(rate);

        if self.session.is_none() {
            return Ok(());
        }
        tracing::debug!(rate, start_ns, "seek");

        // A finished decoder (or a drained chain) has closed its links;
        // those cannot be reused, so rebuild the session instead.
        let finished = self
            .session
            .as_ref()
            .map(|s| {
                s.staging.is_closed() || s.out.as_ref().is_some_and(|o| o.is_closed())
            })
            .unwrap_or(false);

        if finished {
            let was_linked = self.session.as_ref().map(|s| s.linked).unwrap_or(false);
            let pad = self.session.as_ref().map(|s| DecoderPad {
                media_type: "audio/x-raw".to_string(),
                sample_rate: s.probed.sample_rate,
                channels: s.probed.channels,
            });
            self.teardown_session();
            self.start_session_at(start_ns);
            if was_linked {
                if let Some(pad) = pad {
                    self.link_decoder(&pad)?;
                }
            }
            return Ok(());
        }

        self.restart_decoder_at(start_ns);
        Ok(())
    }

    fn query_position(&mut self) -> Query<u64> {
        self.position_ns().ok_or(QueryPending)
    }

    fn query_duration(&mut self) -> Query<u64> {
        match &self.session {
            Some(s) => s.duration_ns.ok_or(QueryPending),
            None => Err(QueryPending),
        }
    }

    fn set_volume(&mut self, volume: f64) {
        self.gain.set(volume);
    }

    fn volume(&self) -> f64 {
        self.gain.get()
    }

    fn link_decoder(&mut self, pad: &DecoderPad) -> Result<LinkOutcome, PlayerError> {
        let dst_rate = self.stream_config.sample_rate;
        let dst_channels = self.stream_config.channels as usize;

        let Some(session) = self.session.as_mut() else {
            return Err(PlayerError::NoStream);
        };
        if session.linked {
            return Ok(LinkOutcome::AlreadyLinked);
        }

        let out = Arc::new(StageLink::new(
            dst_channels,
            capacity_for(dst_rate, dst_channels, self.config.buffer_seconds),
        ));

        let chain = chain::spawn_chain(chain::ChainParams {
            staging: session.staging.clone(),
            out: out.clone(),
            src_rate: session.probed.sample_rate,
            dst_rate,
            src_channels: session.probed.channels,
            dst_channels,
            chunk_frames: self.config.chunk_frames,
            tempo_window_frames: self.config.tempo_window_frames,
            gain: self.gain.clone(),
            tempo: self.tempo.clone(),
            epoch: session.epoch.clone(),
        });

        let stream = sink::build_output_stream(
            &self.device,
            &self.stream_config,
            self.sample_format,
            sink::SinkParams {
                out: out.clone(),
                paused: session.paused.clone(),
                played_frames: session.played_frames.clone(),
                eos_sent: session.eos_sent.clone(),
                bus: self.bus_tx.clone(),
                refill_max_frames: self.config.refill_max_frames,
            },
        )
        .map_err(|e| PlayerError::EngineUnavailable(format!("{e:#}")))?;
        stream
            .play()
            .map_err(|e| PlayerError::EngineUnavailable(format!("{e:#}")))?;

        tracing::debug!(
            src_rate = pad.sample_rate,
            src_channels = pad.channels,
            dst_rate,
            dst_channels,
            "decoder pad linked"
        );

        session.out = Some(out);
        session.chain = Some(chain);
        session.stream = Some(stream);
        session.linked = true;
        Ok(LinkOutcome::Linked)
    }

    fn rebuild(&mut self) -> Result<(), PlayerError> {
        self.teardown_session();
        while self.bus_rx.try_recv().is_ok() {}
        self.gain.set(1.0);
        self.tempo.set(1.0);
        self.state = TransportState::Null;
        tracing::debug!("graph rebuilt");
        Ok(())
    }

    fn bus(&self) -> Receiver<BusMessage> {
        self.bus_rx.clone()
    }
}

impl Drop for AudioGraph {
    fn drop(&mut self) {
        self.teardown_session();
    }
}

/// Position clock: `base + played * rate / device_rate`, clamped to the
/// duration when known.
///
/// `rate` must be the factor that was in effect while `played_frames`
/// were produced; resolving a held position with a freshly requested
/// rate would relocate playback by the rate ratio.
fn clock_position_ns(
    base_ns: u64,
    played_frames: u64,
    rate: f64,
    dst_rate: u32,
    duration_ns: Option<u64>,
) -> u64 {
    let advanced = played_frames as f64 * rate * NS_PER_SECOND as f64 / dst_rate as f64;
    let pos = base_ns.saturating_add(advanced as u64);
    match duration_ns {
        Some(d) => pos.min(d),
        None => pos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_scales_played_frames_by_their_rate() {
        // One second of output frames at unity covers one stream second;
        // the same frames played under a doubled factor cover two. A
        // held-position resolution therefore has to use the factor the
        // frames were played under, never a newly requested one.
        assert_eq!(clock_position_ns(0, 48_000, 1.0, 48_000, None), NS_PER_SECOND);
        assert_eq!(
            clock_position_ns(0, 48_000, 2.0, 48_000, None),
            2 * NS_PER_SECOND
        );
    }

    #[test]
    fn clock_rebases_from_the_seek_target() {
        let ns = clock_position_ns(5 * NS_PER_SECOND, 24_000, 1.0, 48_000, None);
        assert_eq!(ns, 5 * NS_PER_SECOND + NS_PER_SECOND / 2);
    }

    #[test]
    fn clock_clamps_to_duration() {
        let ns = clock_position_ns(
            NS_PER_SECOND,
            96_000,
            1.0,
            48_000,
            Some(2 * NS_PER_SECOND),
        );
        assert_eq!(ns, 2 * NS_PER_SECOND);
    }
}
