//! PCM encoding and decoding for the wire format.
//!
//! Outbound audio is 16 kHz mono s16le; inbound audio is 24 kHz s16le,
//! usually mono. Both directions wrap the raw bytes in base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{Result, SessionError};

/// Scale factor between f32 samples in [-1, 1] and i16 wire samples.
pub const PCM_SCALE: f32 = 32768.0;

/// Encode a frame of f32 samples as little-endian signed 16-bit PCM.
///
/// Samples outside [-1, 1] are clamped rather than wrapped.
pub fn encode_frame(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s * PCM_SCALE).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decoded inbound audio, deinterleaved into per-channel sample vectors.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    /// One vector of f32 samples per channel.
    pub channels: Vec<Vec<f32>>,
    /// Sample rate of the decoded audio (Hz).
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Duration of the buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Collapse to a single mono channel by averaging.
    pub fn into_mono(self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels.into_iter().next().unwrap_or_default();
        }
        let frames = self.frames();
        let n = self.channels.len() as f32;
        let mut mono = vec![0.0f32; frames];
        for ch in &self.channels {
            for (acc, &s) in mono.iter_mut().zip(ch) {
                *acc += s;
            }
        }
        for s in &mut mono {
            *s /= n;
        }
        mono
    }
}

/// Decode interleaved little-endian s16 PCM into a [`PlaybackBuffer`].
pub fn decode_chunk(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PlaybackBuffer> {
    if channels == 0 {
        return Err(SessionError::Decode("zero channels".into()));
    }
    let stride = 2 * channels as usize;
    if bytes.len() % stride != 0 {
        return Err(SessionError::Decode(format!(
            "payload length {} is not a multiple of frame stride {stride}",
            bytes.len()
        )));
    }
    let frames = bytes.len() / stride;
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels as usize];
    for frame in bytes.chunks_exact(stride) {
        for (ch, pair) in frame.chunks_exact(2).enumerate() {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            out[ch].push(v as f32 / PCM_SCALE);
        }
    }
    Ok(PlaybackBuffer {
        channels: out,
        sample_rate,
    })
}

/// Base64-encode raw PCM bytes for the wire.
pub fn to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode base64 payload text into raw PCM bytes.
pub fn from_base64(text: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(text)
        .map_err(|e| SessionError::Decode(e.to_string()))
}
