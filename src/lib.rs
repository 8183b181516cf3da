//! Real-time voice conversation client.
//!
//! Captures microphone audio, streams it to a remote conversational audio
//! service over a WebSocket, and plays the synthesized replies back with
//! gapless scheduling and barge-in handling. Transcription fragments are
//! aggregated into a turn-based conversation history.
//!
//! # Example
//!
//! ```no_run
//! use viva::{SessionConfig, SessionFactory};
//!
//! # async fn run() -> viva::Result<()> {
//! let factory = SessionFactory::new(SessionConfig::default());
//! let session = factory.start().await?;
//! let mut events = session.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod pcm;
pub mod session;
pub mod transcript;
pub mod transport;

pub use config::{AudioConfig, ConversationConfig, SessionConfig, TransportConfig, Voice};
pub use error::{Result, SessionError};
pub use session::{Session, SessionEvent, SessionFactory, SessionState};
pub use transcript::{Author, TranscriptEntry};
