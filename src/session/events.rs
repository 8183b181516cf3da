//! Session state and events surfaced to the host application.

use std::fmt;

use crate::transcript::{Author, TranscriptEntry};

/// Capacity of the session event broadcast channel. Slow subscribers
/// experience lag, never backpressure into the session.
pub const EVENT_BUFFER: usize = 64;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session running.
    Idle,
    /// Channel opening and setup in flight.
    Connecting,
    /// Connected, capturing, no reply currently audible.
    Listening,
    /// Reply audio is scheduled or playing.
    Speaking,
    /// The session ended on a fault. A new session may be started.
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Listening => "listening",
            SessionState::Speaking => "speaking",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Events broadcast by a running session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Lifecycle transition.
    StateChanged(SessionState),
    /// A transcription fragment arrived; `text` is the full interim text for
    /// that author so far this turn.
    PartialTranscript { author: Author, text: String },
    /// A turn completed and these entries were appended to the history.
    TurnCommitted(Vec<TranscriptEntry>),
    /// The session hit a fault and is tearing down.
    Error { message: String },
}
