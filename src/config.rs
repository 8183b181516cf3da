//! Session configuration, loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Top-level configuration for a voice session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Audio capture and playback settings.
    #[serde(default)]
    pub audio: AudioConfig,
    /// Conversation settings sent to the remote service.
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Audio capture and playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate of audio sent to the service (Hz).
    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,
    /// Sample rate of audio received from the service (Hz).
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,
    /// Number of samples accumulated per outbound frame.
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    /// Input device name (substring match). None = system default.
    #[serde(default)]
    pub input_device: Option<String>,
    /// Output device name (substring match). None = system default.
    #[serde(default)]
    pub output_device: Option<String>,
}

fn default_input_sample_rate() -> u32 {
    16_000
}

fn default_output_sample_rate() -> u32 {
    24_000
}

fn default_frame_size() -> usize {
    4096
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: default_input_sample_rate(),
            output_sample_rate: default_output_sample_rate(),
            frame_size: default_frame_size(),
            input_device: None,
            output_device: None,
        }
    }
}

/// Voice used for synthesized replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Puck,
    Zephyr,
    Charon,
    Kore,
    Fenrir,
}

impl Voice {
    /// Wire name used in the session setup message.
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Puck => "Puck",
            Voice::Zephyr => "Zephyr",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
        }
    }
}

/// Conversation settings sent to the remote service during setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Reply voice.
    #[serde(default)]
    pub voice: Voice,
    /// System instructions for the model.
    #[serde(default)]
    pub system_instructions: String,
    /// Request transcription of captured speech.
    #[serde(default = "default_true")]
    pub transcribe_input: bool,
    /// Request transcription of synthesized replies.
    #[serde(default = "default_true")]
    pub transcribe_output: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            voice: Voice::default(),
            system_instructions: String::new(),
            transcribe_input: true,
            transcribe_output: true,
        }
    }
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// WebSocket URL of the conversational audio service.
    #[serde(default = "default_url")]
    pub url: String,
}

fn default_url() -> String {
    "ws://localhost:9090/live".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&text).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Write configuration to a TOML file, creating parent directories.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text =
            toml::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Default config path: `$XDG_CONFIG_HOME/viva/config.toml`, falling
    /// back to `~/.config/viva/config.toml`.
    pub fn default_config_path() -> Option<PathBuf> {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            if !xdg.is_empty() {
                return Some(PathBuf::from(xdg).join("viva").join("config.toml"));
            }
        }
        std::env::var("HOME").ok().map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("viva")
                .join("config.toml")
        })
    }
}
