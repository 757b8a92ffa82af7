//! Error taxonomy for the player control surface.
//!
//! Construction-time failures are hard errors surfaced synchronously.
//! Steady-state playback failures degrade to the NULL transport state
//! plus a [`crate::player::PlayerEvent::DecodeError`] event and never
//! reach the caller as a panic.

use thiserror::Error;

/// Errors returned by the player control surface.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Pipeline or element construction failed (no output device,
    /// unsupported configuration, resource exhaustion). Fatal to the
    /// player instance.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// An operation required a loaded stream but none was opened.
    #[error("no stream loaded")]
    NoStream,

    /// A position query stayed unanswered after the bounded retry
    /// budget was exhausted.
    #[error("position query timed out")]
    QueryTimeout,
}
