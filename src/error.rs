//! Error types for the voice session client.

/// Top-level error type for the voice session system.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The channel to the remote service failed to open.
    #[error("connect error: {0}")]
    Connect(String),

    /// Microphone or audio-output device acquisition failed.
    #[error("device error: {0}")]
    Device(String),

    /// Malformed inbound audio payload. Recovered locally — the chunk is
    /// skipped and the session continues.
    #[error("decode error: {0}")]
    Decode(String),

    /// Mid-session transport fault; triggers full teardown.
    #[error("channel error: {0}")]
    Channel(String),

    /// Session lifecycle violation (e.g. start while already active).
    #[error("session error: {0}")]
    Session(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SessionError>;
