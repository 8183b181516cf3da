//! Audio capture and playback.

pub mod capture;
pub mod playback;

/// Wrapper that lets a cpal stream live inside a struct that crosses await
/// points. The stream itself is never touched from another thread; it is
/// created and dropped by its single owner.
pub(crate) struct SendableStream(#[allow(dead_code)] pub(crate) cpal::Stream);

// SAFETY: the stream is owned by exactly one capture/playback handle and is
// only created and dropped on that owner; it is never accessed concurrently.
unsafe impl Send for SendableStream {}
