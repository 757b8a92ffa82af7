//! Playback controller and bus-message bridge.
//!
//! [`Player`] owns the engine and is the single writer of its transport
//! state. It implements the open/play/pause/seek/rate/volume surface a
//! transcription front end needs and republishes engine bus messages as
//! [`PlayerEvent`]s when the owner pumps it.

use std::path::{Path, PathBuf};

use crate::engine::{
    BusMessage, LinkOutcome, PlaybackEngine, SeekTarget, TransportState,
};
use crate::error::PlayerError;
use crate::graph::{AudioGraph, GraphConfig};
use crate::retry::{retry_query, RetryPolicy};

/// Events delivered to the owning front end.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The decoder was linked into the pipeline; the stream identified
    /// by the payload is ready for controlled playback.
    Ready(String),
    /// Playback reached the end of the stream.
    Ended,
    /// The stream duration became known or changed.
    DurationChanged,
    /// A mid-stream decode or output error; the transport is back at
    /// `Null`. Payload is diagnostic detail.
    DecodeError(String),
}

/// Playback controller wrapping a [`PlaybackEngine`].
pub struct Player<E: PlaybackEngine> {
    engine: E,
    rate: f64,
    /// Cached duration in nanoseconds. `None` means unresolved; a cached
    /// zero means a query failed and stays until the next invalidation.
    duration: Option<u64>,
    retry: RetryPolicy,
}

impl Player<AudioGraph> {
    /// Build a player over the production pipeline graph.
    ///
    /// Fails with [`PlayerError::EngineUnavailable`] if the output
    /// device or stream configuration cannot be acquired; the player
    /// must not be used in that case.
    pub fn with_default_output(config: GraphConfig) -> Result<Self, PlayerError> {
        Ok(Self::new(AudioGraph::new(config)?))
    }
}

impl<E: PlaybackEngine> Player<E> {
    /// Wrap an already-constructed engine.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            rate: 1.0,
            duration: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Path of the currently loaded stream, if any.
    pub fn filename(&self) -> Option<&Path> {
        self.engine.location()
    }

    /// Whether the transport is currently in the PLAYING state.
    pub fn is_playing(&self) -> bool {
        self.engine.state() == TransportState::Playing
    }

    /// Single state-setter for the pipeline.
    ///
    /// Setting the current state again is a no-op so redundant commands
    /// never ping-pong the engine.
    fn set_state(&mut self, state: TransportState) -> Result<(), PlayerError> {
        if self.engine.state() == state {
            return Ok(());
        }
        self.engine.set_state(state)
    }

    /// Open an audio file and force format negotiation.
    ///
    /// Drives NULL→READY (attach), then PLAYING then PAUSED so the
    /// decoder negotiates its output format and duration becomes
    /// queryable. Each transition blocks until the engine confirms it.
    /// With `query_duration` set (the default entry point
    /// [`Self::open_path`]), the cached duration is reset to unresolved.
    pub fn open(&mut self, path: &Path, query_duration: bool) -> Result<(), PlayerError> {
        tracing::debug!(path = %path.display(), "opening file");
        self.set_state(TransportState::Ready)?;
        self.engine.set_location(path)?;
        if query_duration {
            self.duration = None;
        }
        // Force decoding of the file so a duration is available.
        self.set_state(TransportState::Playing)?;
        self.set_state(TransportState::Paused)?;
        Ok(())
    }

    /// [`Self::open`] with a duration refresh.
    pub fn open_path(&mut self, path: &Path) -> Result<(), PlayerError> {
        self.open(path, true)
    }

    /// Start playback from the current position.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        self.set_state(TransportState::Playing)
    }

    /// Pause playback.
    pub fn pause(&mut self) -> Result<(), PlayerError> {
        self.set_state(TransportState::Paused)
    }

    /// Tear down and rebuild the pipeline, reopening the current stream.
    ///
    /// The stream identity is preserved and the duration cache is not
    /// forced stale. The player is paused afterwards.
    ///
    /// The rebuilt pipeline runs at unity rate and volume while
    /// [`Self::rate`] keeps reporting the stored value; the stored rate
    /// is reapplied by the next seek or rate change, not by the reopen
    /// itself.
    pub fn reset(&mut self) -> Result<(), PlayerError> {
        let path: PathBuf = self
            .engine
            .location()
            .map(Path::to_path_buf)
            .ok_or(PlayerError::NoStream)?;
        tracing::debug!("resetting the pipeline");
        self.set_state(TransportState::Null)?;
        self.engine.rebuild()?;
        self.open(&path, false)
    }

    /// Current playback position in nanoseconds.
    ///
    /// Fails with [`PlayerError::NoStream`] before the first open. The
    /// underlying query can transiently fail right after a state change;
    /// it is retried with bounded backoff and
    /// [`PlayerError::QueryTimeout`] is returned once the budget is
    /// exhausted.
    pub fn position(&mut self) -> Result<u64, PlayerError> {
        if self.engine.location().is_none() {
            return Err(PlayerError::NoStream);
        }
        let engine = &mut self.engine;
        retry_query(&self.retry, || engine.query_position()).ok_or(PlayerError::QueryTimeout)
    }

    /// Seek to an absolute offset in nanoseconds at the current rate.
    ///
    /// Fails with [`PlayerError::NoStream`] before the first open. No
    /// clamping happens here; callers clamp before calling (see
    /// [`Self::move_position`]).
    pub fn set_position(&mut self, ns: u64) -> Result<(), PlayerError> {
        if self.engine.location().is_none() {
            return Err(PlayerError::NoStream);
        }
        self.engine.seek(self.rate, SeekTarget::Absolute(ns))
    }

    /// Move the position by a signed nanosecond delta, clamped to
    /// `[0, duration]`.
    pub fn move_position(&mut self, delta_ns: i64) -> Result<(), PlayerError> {
        let current = self.position()?;
        let duration = self.duration();
        let target = (i128::from(current) + i128::from(delta_ns)).clamp(0, i128::from(duration));
        self.set_position(target as u64)
    }

    /// Current playback rate multiplier.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Change the playback rate, effective immediately.
    ///
    /// Reissues a seek at the current position so the next playback tick
    /// uses the new rate. If the position query is pending the seek
    /// keeps whatever position the engine currently holds instead of
    /// jumping to a guessed offset.
    ///
    /// Negative rates are accepted and reported back by [`Self::rate`],
    /// but playback is forward-only: the engine scales tempo by the
    /// magnitude and the position clock keeps advancing. Reverse motion
    /// is done with explicit seeks.
    pub fn set_rate(&mut self, rate: f64) -> Result<(), PlayerError> {
        self.rate = rate;
        let target = match self.engine.query_position() {
            Ok(ns) => SeekTarget::Absolute(ns),
            Err(_) => SeekTarget::Current,
        };
        self.engine.seek(rate, target)
    }

    /// Stream duration in nanoseconds; 0 while unknown.
    ///
    /// Returns the cached value when present. Otherwise queries once; a
    /// pending result is cached as 0 until the next invalidation (a new
    /// `open` or a `DurationChanged` event). This is deliberately
    /// asymmetric with the position query's retry loop: duration is
    /// queried rarely and a transient zero is acceptable.
    pub fn duration(&mut self) -> u64 {
        if let Some(ns) = self.duration {
            return ns;
        }
        let ns = match self.engine.query_duration() {
            Ok(ns) => ns,
            Err(_) => {
                tracing::debug!("duration query pending; caching zero");
                0
            }
        };
        self.duration = Some(ns);
        ns
    }

    /// Current gain-stage volume.
    pub fn volume(&self) -> f64 {
        self.engine.volume()
    }

    /// Set the gain-stage volume. Pass-through; the engine may clamp.
    pub fn set_volume(&mut self, volume: f64) {
        self.engine.set_volume(volume);
    }

    /// Drain pending engine bus messages and return the resulting
    /// events, in emission order.
    ///
    /// Call this from the owning event loop. Handles pad linking (the
    /// two-phase graph resolution), EOS and error recovery to `Null`,
    /// and duration-cache invalidation.
    pub fn pump(&mut self) -> Vec<PlayerEvent> {
        let bus = self.engine.bus();
        let mut events = Vec::new();

        while let Ok(message) = bus.try_recv() {
            match message {
                BusMessage::PadAdded(pad) => {
                    if !pad.is_audio() {
                        tracing::debug!(media_type = %pad.media_type, "ignoring non-audio pad");
                        continue;
                    }
                    match self.engine.link_decoder(&pad) {
                        Ok(LinkOutcome::Linked) => {
                            let stream = self
                                .engine
                                .location()
                                .map(|p| p.display().to_string())
                                .unwrap_or_default();
                            events.push(PlayerEvent::Ready(stream));
                        }
                        Ok(LinkOutcome::AlreadyLinked) => {}
                        Err(e) => tracing::warn!("decoder link failed: {e}"),
                    }
                }
                BusMessage::Eos => {
                    if let Err(e) = self.set_state(TransportState::Null) {
                        tracing::warn!("state reset after EOS failed: {e}");
                    }
                    events.push(PlayerEvent::Ended);
                }
                BusMessage::Error(detail) => {
                    tracing::warn!(%detail, "engine reported an error");
                    if let Err(e) = self.set_state(TransportState::Null) {
                        tracing::warn!("state reset after error failed: {e}");
                    }
                    events.push(PlayerEvent::DecodeError(detail));
                }
                BusMessage::DurationChanged => {
                    self.duration = None;
                    events.push(PlayerEvent::DurationChanged);
                }
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use crossbeam_channel::{Receiver, Sender};

    use crate::engine::{DecoderPad, Query, QueryPending};

    /// Scripted engine recording every control-plane call.
    struct MockEngine {
        state: TransportState,
        location: Option<PathBuf>,
        set_state_calls: Vec<TransportState>,
        seeks: Vec<(f64, SeekTarget)>,
        positions: VecDeque<Query<u64>>,
        durations: VecDeque<Query<u64>>,
        volume: f64,
        linked: bool,
        link_calls: usize,
        rebuilds: usize,
        bus_tx: Sender<BusMessage>,
        bus_rx: Receiver<BusMessage>,
    }

    impl MockEngine {
        fn new() -> Self {
            let (bus_tx, bus_rx) = crossbeam_channel::unbounded();
            Self {
                state: TransportState::Null,
                location: None,
                set_state_calls: Vec::new(),
                seeks: Vec::new(),
                positions: VecDeque::new(),
                durations: VecDeque::new(),
                volume: 1.0,
                linked: false,
                link_calls: 0,
                rebuilds: 0,
                bus_tx,
                bus_rx,
            }
        }
    }

    impl PlaybackEngine for MockEngine {
        fn set_location(&mut self, path: &Path) -> Result<(), PlayerError> {
            self.location = Some(path.to_path_buf());
            Ok(())
        }

        fn location(&self) -> Option<&Path> {
            self.location.as_deref()
        }

        fn set_state(&mut self, state: TransportState) -> Result<(), PlayerError> {
            self.set_state_calls.push(state);
            self.state = state;
            Ok(())
        }

        fn state(&self) -> TransportState {
            self.state
        }

        fn seek(&mut self, rate: f64, target: SeekTarget) -> Result<(), PlayerError> {
            self.seeks.push((rate, target));
            Ok(())
        }

        fn query_position(&mut self) -> Query<u64> {
            self.positions.pop_front().unwrap_or(Err(QueryPending))
        }

        fn query_duration(&mut self) -> Query<u64> {
            self.durations.pop_front().unwrap_or(Err(QueryPending))
        }

        fn set_volume(&mut self, volume: f64) {
            self.volume = volume;
        }

        fn volume(&self) -> f64 {
            self.volume
        }

        fn link_decoder(&mut self, _pad: &DecoderPad) -> Result<LinkOutcome, PlayerError> {
            self.link_calls += 1;
            if self.linked {
                Ok(LinkOutcome::AlreadyLinked)
            } else {
                self.linked = true;
                Ok(LinkOutcome::Linked)
            }
        }

        fn rebuild(&mut self) -> Result<(), PlayerError> {
            self.rebuilds += 1;
            self.linked = false;
            while self.bus_rx.try_recv().is_ok() {}
            Ok(())
        }

        fn bus(&self) -> Receiver<BusMessage> {
            self.bus_rx.clone()
        }
    }

    fn instant_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn audio_pad() -> DecoderPad {
        DecoderPad {
            media_type: "audio/x-raw".into(),
            sample_rate: 48_000,
            channels: 1,
        }
    }

    fn opened_player() -> Player<MockEngine> {
        let mut player = Player::new(MockEngine::new());
        player.retry = instant_retry(3);
        player.open_path(Path::new("/tmp/interview.ogg")).unwrap();
        player
    }

    #[test]
    fn open_forces_negotiation_and_resets_duration_cache() {
        let mut player = Player::new(MockEngine::new());
        player.duration = Some(42);

        player.open_path(Path::new("/tmp/interview.ogg")).unwrap();

        assert_eq!(
            player.engine.set_state_calls,
            vec![
                TransportState::Ready,
                TransportState::Playing,
                TransportState::Paused
            ]
        );
        assert_eq!(player.duration, None);
        assert_eq!(player.filename(), Some(Path::new("/tmp/interview.ogg")));
    }

    #[test]
    fn open_without_duration_refresh_keeps_cache() {
        let mut player = opened_player();
        player.duration = Some(42);
        player.open(Path::new("/tmp/interview.ogg"), false).unwrap();
        assert_eq!(player.duration, Some(42));
    }

    #[test]
    fn redundant_state_sets_are_filtered() {
        let mut player = opened_player();
        let calls_before = player.engine.set_state_calls.len();

        player.pause().unwrap();
        player.pause().unwrap();
        assert_eq!(player.engine.set_state_calls.len(), calls_before);

        player.play().unwrap();
        player.play().unwrap();
        assert_eq!(player.engine.set_state_calls.len(), calls_before + 1);
        assert!(player.is_playing());
    }

    #[test]
    fn rate_round_trips_and_reissues_seek_at_held_position() {
        let mut player = opened_player();
        player.engine.positions.push_back(Ok(5_000_000_000));

        player.set_rate(1.5).unwrap();

        assert_eq!(player.rate(), 1.5);
        assert_eq!(
            player.engine.seeks.last(),
            Some(&(1.5, SeekTarget::Absolute(5_000_000_000)))
        );
    }

    #[test]
    fn rate_change_with_pending_position_keeps_engine_position() {
        let mut player = opened_player();

        player.set_rate(2.0).unwrap();

        assert_eq!(player.engine.seeks.last(), Some(&(2.0, SeekTarget::Current)));
    }

    #[test]
    fn set_position_seeks_at_current_rate() {
        let mut player = opened_player();
        player.set_rate(0.7).unwrap();

        player.set_position(9_000).unwrap();

        assert_eq!(
            player.engine.seeks.last(),
            Some(&(0.7, SeekTarget::Absolute(9_000)))
        );
    }

    #[test]
    fn move_position_clamps_to_duration() {
        let mut player = opened_player();
        player.duration = Some(10_000_000_000);
        player.engine.positions.push_back(Ok(5_000_000_000));

        player.move_position(i64::MAX).unwrap();

        assert_eq!(
            player.engine.seeks.last(),
            Some(&(1.0, SeekTarget::Absolute(10_000_000_000)))
        );
    }

    #[test]
    fn move_position_clamps_to_zero() {
        let mut player = opened_player();
        player.duration = Some(10_000_000_000);
        player.engine.positions.push_back(Ok(2_000_000_000));

        player.move_position(-i64::MAX).unwrap();

        assert_eq!(
            player.engine.seeks.last(),
            Some(&(1.0, SeekTarget::Absolute(0)))
        );
    }

    #[test]
    fn position_retries_until_success_flag() {
        let mut player = opened_player();
        player.retry = instant_retry(5);
        player.engine.positions.push_back(Err(QueryPending));
        player.engine.positions.push_back(Err(QueryPending));
        player.engine.positions.push_back(Ok(7));

        assert_eq!(player.position().unwrap(), 7);
    }

    #[test]
    fn position_times_out_when_budget_exhausted() {
        let mut player = opened_player();
        player.retry = instant_retry(3);

        assert!(matches!(player.position(), Err(PlayerError::QueryTimeout)));
    }

    #[test]
    fn duration_query_failure_caches_zero_until_invalidated() {
        let mut player = opened_player();

        // First query pends; zero is cached.
        assert_eq!(player.duration(), 0);
        // Even with an answer available now, the cache wins.
        player.engine.durations.push_back(Ok(5_000));
        assert_eq!(player.duration(), 0);

        // A duration-changed message invalidates the cache.
        player.engine.bus_tx.send(BusMessage::DurationChanged).unwrap();
        let events = player.pump();
        assert_eq!(events, vec![PlayerEvent::DurationChanged]);
        assert_eq!(player.duration(), 5_000);
    }

    #[test]
    fn volume_passes_through() {
        let mut player = opened_player();
        player.set_volume(0.5);
        assert_eq!(player.volume(), 0.5);
    }

    #[test]
    fn eos_while_playing_nulls_state_and_emits_ended_once() {
        let mut player = opened_player();
        player.play().unwrap();

        player.engine.bus_tx.send(BusMessage::Eos).unwrap();
        let events = player.pump();

        assert_eq!(events, vec![PlayerEvent::Ended]);
        assert_eq!(player.engine.state(), TransportState::Null);
        assert!(!player.is_playing());
        assert!(player.pump().is_empty());
    }

    #[test]
    fn error_message_nulls_state_and_reports_detail() {
        let mut player = opened_player();
        player.play().unwrap();

        player
            .engine
            .bus_tx
            .send(BusMessage::Error("bad packet".into()))
            .unwrap();
        let events = player.pump();

        assert_eq!(events, vec![PlayerEvent::DecodeError("bad packet".into())]);
        assert_eq!(player.engine.state(), TransportState::Null);
    }

    #[test]
    fn duplicate_pad_added_links_once_and_emits_one_ready() {
        let mut player = opened_player();
        player.engine.bus_tx.send(BusMessage::PadAdded(audio_pad())).unwrap();
        player.engine.bus_tx.send(BusMessage::PadAdded(audio_pad())).unwrap();

        let events = player.pump();

        assert_eq!(events, vec![PlayerEvent::Ready("/tmp/interview.ogg".into())]);
        assert_eq!(player.engine.link_calls, 2);
        assert!(player.engine.linked);
    }

    #[test]
    fn non_audio_pads_are_not_linked() {
        let mut player = opened_player();
        let pad = DecoderPad {
            media_type: "video/x-raw".into(),
            sample_rate: 0,
            channels: 0,
        };
        player.engine.bus_tx.send(BusMessage::PadAdded(pad)).unwrap();

        assert!(player.pump().is_empty());
        assert_eq!(player.engine.link_calls, 0);
    }

    #[test]
    fn reset_preserves_stream_identity_and_pauses() {
        let mut player = opened_player();
        player.duration = Some(42);
        player.play().unwrap();
        let before = player.filename().unwrap().to_path_buf();

        player.reset().unwrap();

        assert_eq!(player.filename(), Some(before.as_path()));
        assert!(!player.is_playing());
        assert_eq!(player.engine.rebuilds, 1);
        // Reopen does not force a duration refresh.
        assert_eq!(player.duration(), 42);
    }

    #[test]
    fn reset_without_stream_is_an_error() {
        let mut player = Player::new(MockEngine::new());
        assert!(matches!(player.reset(), Err(PlayerError::NoStream)));
    }

    #[test]
    fn position_and_seeks_before_open_report_no_stream() {
        let mut player = Player::new(MockEngine::new());

        assert!(matches!(player.position(), Err(PlayerError::NoStream)));
        assert!(matches!(
            player.set_position(5_000_000_000),
            Err(PlayerError::NoStream)
        ));
        assert!(matches!(
            player.move_position(1_000),
            Err(PlayerError::NoStream)
        ));
        assert!(player.engine.seeks.is_empty());
    }

    #[test]
    fn negative_rate_round_trips_while_playback_stays_forward() {
        let mut player = opened_player();
        player.engine.positions.push_back(Ok(3_000_000_000));

        player.set_rate(-2.0).unwrap();

        // The signed value is stored and handed to the engine; the
        // engine plays forward at the magnitude.
        assert_eq!(player.rate(), -2.0);
        assert_eq!(
            player.engine.seeks.last(),
            Some(&(-2.0, SeekTarget::Absolute(3_000_000_000)))
        );
    }

    #[test]
    fn reset_keeps_reported_rate_without_reapplying_it() {
        let mut player = opened_player();
        player.engine.positions.push_back(Ok(0));
        player.set_rate(1.5).unwrap();
        let seeks_before = player.engine.seeks.len();

        player.reset().unwrap();

        // The rebuilt pipeline runs at unity until the next seek; the
        // stored rate is reported as-is and reapplied then.
        assert_eq!(player.rate(), 1.5);
        assert_eq!(player.engine.seeks.len(), seeks_before);

        player.set_position(0).unwrap();
        assert_eq!(
            player.engine.seeks.last(),
            Some(&(1.5, SeekTarget::Absolute(0)))
        );
    }
}
