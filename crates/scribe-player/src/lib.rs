//! Scribe player, an audio playback engine for manual transcription.
//!
//! The crate pairs a playback controller (open/play/pause, seek, rate,
//! volume, duration/position queries) with a streaming pipeline:
//!
//! 1. **Source/Decode**: a background thread uses Symphonia to probe the
//!    container and decode the file into interleaved `f32`.
//! 2. **Convert**: channel mapping to the output device layout.
//! 3. **Resample**: Rubato converts to the output device sample rate.
//! 4. **Gain**: volume applied as a plain multiply.
//! 5. **Tempo**: overlap-add tempo scaling so playback speed changes do
//!    not change pitch.
//! 6. **Sink**: the CPAL callback pulls finished audio without blocking.
//!
//! Stages communicate via bounded queues ([`graph::link::StageLink`]).
//! The decoder's output format is not known until the container is
//! probed, so the downstream chain is held pending and resolved when the
//! owner pumps the [`engine::BusMessage::PadAdded`] message; see
//! [`player::Player::pump`].
//!
//! The control surface is the [`engine::PlaybackEngine`] trait;
//! [`graph::AudioGraph`] is the production implementation. All control
//! calls are expected from a single thread.

pub mod engine;
pub mod error;
pub mod graph;
pub mod player;
pub mod retry;
pub mod time;

pub use engine::{
    BusMessage, DecoderPad, LinkOutcome, PlaybackEngine, Query, QueryPending, SeekTarget,
    TransportState,
};
pub use error::PlayerError;
pub use graph::{AudioGraph, GraphConfig};
pub use player::{Player, PlayerEvent};
pub use retry::RetryPolicy;
pub use time::Timecode;
