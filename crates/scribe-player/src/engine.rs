//! Engine control surface and bus message types.
//!
//! The controller ([`crate::player::Player`]) is written against the
//! [`PlaybackEngine`] trait so the state machine and event bridge can be
//! exercised with a scripted engine in tests while production code uses
//! [`crate::graph::AudioGraph`].

use std::path::Path;

use crossbeam_channel::Receiver;

use crate::error::PlayerError;

/// Playback lifecycle state of the pipeline.
///
/// `Null` doubles as the terminal/error-recovery state: end-of-stream and
/// decode errors both drive the pipeline back to `Null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No pipeline activity.
    Null,
    /// Source attached, data not yet flowing.
    Ready,
    Playing,
    Paused,
}

/// Marker for a query the engine cannot answer yet.
///
/// A pending result is distinct from a legitimate zero value; callers
/// retry with [`crate::retry::retry_query`] instead of treating zero as
/// a sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPending;

/// Result of an engine query that may transiently fail.
pub type Query<T> = Result<T, QueryPending>;

/// Target of a seek request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekTarget {
    /// Flushing, accurate seek to an absolute offset in nanoseconds.
    Absolute(u64),
    /// Keep whatever position the engine currently holds; used when a
    /// rate change must be applied but the position query is pending.
    Current,
}

/// The decoder's dynamically-appearing output port.
///
/// The decode stage only learns the stream format once the container has
/// been probed; it then announces the port via
/// [`BusMessage::PadAdded`] and the bridge links it into the pre-built
/// downstream chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderPad {
    /// Media type of the port, e.g. `audio/x-raw`. Only `audio/`-class
    /// ports are linked.
    pub media_type: String,
    /// Decoded sample rate in Hz.
    pub sample_rate: u32,
    /// Decoded channel count.
    pub channels: usize,
}

impl DecoderPad {
    /// Whether this port carries audio and should be linked.
    pub fn is_audio(&self) -> bool {
        self.media_type.starts_with("audio/")
    }
}

/// Outcome of a link request for a decoder pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The pad was linked into the downstream chain.
    Linked,
    /// The chain was already linked; the request was a no-op.
    AlreadyLinked,
}

/// Asynchronous notifications posted by the engine.
///
/// Messages are delivered in emission order over a channel drained by
/// the control thread ([`crate::player::Player::pump`]).
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// The decoder negotiated its output format.
    PadAdded(DecoderPad),
    /// End of stream reached and all buffered audio played out.
    Eos,
    /// A mid-stream decode or output error. Diagnostic detail only; the
    /// bridge drives the transport to `Null`.
    Error(String),
    /// The stream duration became known or changed; cached values are
    /// stale until re-queried.
    DurationChanged,
}

/// Control-plane surface of a playback engine.
///
/// All calls are synchronous and expected from a single control thread.
/// State changes block until the engine confirms the transition, so a
/// query issued after `set_state` returns observes its effect.
pub trait PlaybackEngine {
    /// Attach a source file. Cheap; decoding starts on the next
    /// transition out of `Null`/`Ready`. An unreadable file surfaces
    /// later as a [`BusMessage::Error`].
    fn set_location(&mut self, path: &Path) -> Result<(), PlayerError>;

    /// Path of the currently attached source, if any.
    fn location(&self) -> Option<&Path>;

    /// Drive the pipeline to `state`, blocking until confirmed.
    ///
    /// Callers filter redundant sets; implementations may assume the
    /// requested state differs from the current one but must stay
    /// harmless if it does not.
    fn set_state(&mut self, state: TransportState) -> Result<(), PlayerError>;

    /// Current confirmed transport state.
    fn state(&self) -> TransportState;

    /// Issue a flushing, accurate seek at `rate` to `target`.
    ///
    /// The rate applies to all subsequent playback until the next seek.
    fn seek(&mut self, rate: f64, target: SeekTarget) -> Result<(), PlayerError>;

    /// Current playback offset in nanoseconds.
    fn query_position(&mut self) -> Query<u64>;

    /// Total stream duration in nanoseconds.
    fn query_duration(&mut self) -> Query<u64>;

    /// Set the gain-stage volume (1.0 = unity). Independent of transport
    /// state; not clamped at this layer.
    fn set_volume(&mut self, volume: f64);

    /// Current gain-stage volume.
    fn volume(&self) -> f64;

    /// Link a decoder pad into the pending downstream chain.
    ///
    /// Idempotent: a second request for the same stream reports
    /// [`LinkOutcome::AlreadyLinked`] without touching the chain.
    fn link_decoder(&mut self, pad: &DecoderPad) -> Result<LinkOutcome, PlayerError>;

    /// Tear the pipeline down and rebuild it from scratch, dropping any
    /// in-flight bus messages. The attached location is kept.
    fn rebuild(&mut self) -> Result<(), PlayerError>;

    /// Receiver for bus messages posted by the engine.
    fn bus(&self) -> Receiver<BusMessage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_pads_are_recognized_by_media_type_prefix() {
        let pad = DecoderPad {
            media_type: "audio/x-raw".into(),
            sample_rate: 48_000,
            channels: 2,
        };
        assert!(pad.is_audio());

        let pad = DecoderPad {
            media_type: "video/x-raw".into(),
            sample_rate: 0,
            channels: 0,
        };
        assert!(!pad.is_audio());
    }
}
