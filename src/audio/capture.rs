//! Microphone capture using cpal.
//!
//! Captures at the device's native sample rate, downmixes to mono,
//! downsamples to the configured outbound rate (default 16 kHz), and sends
//! fixed-size PCM frames to the transport.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tracing::{debug, error, info};

use crate::audio::SendableStream;
use crate::config::AudioConfig;
use crate::error::{Result, SessionError};
use crate::pcm;
use crate::transport::OutboundSender;

/// Source of outbound audio frames.
pub trait CaptureSource: Send {
    /// Start capturing and delivering frames to `sink`. Idempotent.
    fn start(&mut self, sink: OutboundSender) -> Result<()>;
    /// Stop capturing. Idempotent.
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

/// Accumulates samples into fixed-size frames for the wire.
struct FrameChunker {
    frame_size: usize,
    buffer: Vec<f32>,
}

impl FrameChunker {
    fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            buffer: Vec::with_capacity(frame_size),
        }
    }

    /// Feed samples, emitting every completed frame through `emit`.
    fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_size - self.buffer.len()).min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buffer.len() == self.frame_size {
                emit(&self.buffer);
                self.buffer.clear();
            }
        }
    }
}

/// Microphone capture via cpal.
pub struct MicCapture {
    config: AudioConfig,
    stream: Option<SendableStream>,
}

impl MicCapture {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }
}

impl CaptureSource for MicCapture {
    fn start(&mut self, sink: OutboundSender) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = if let Some(ref name) = self.config.input_device {
            host.input_devices()
                .map_err(|e| SessionError::Device(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name().contains(name.as_str()))
                        .unwrap_or(false)
                })
                .ok_or_else(|| SessionError::Device(format!("input device '{name}' not found")))?
        } else {
            host.default_input_device()
                .ok_or_else(|| SessionError::Device("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        // The device's default config is the most compatible; mono conversion
        // and rate conversion happen in software.
        let default_config = device
            .default_input_config()
            .map_err(|e| SessionError::Device(format!("no default input config: {e}")))?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels();
        let target_rate = self.config.input_sample_rate;

        let stream_config = StreamConfig {
            channels: native_channels,
            sample_rate: native_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            "native input config: {}Hz, {} channels",
            native_rate, native_channels
        );
        if native_rate != target_rate {
            info!("will downsample from {native_rate}Hz to {target_rate}Hz");
        }

        let mut chunker = FrameChunker::new(self.config.frame_size);
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = if native_channels > 1 {
                        to_mono(data, native_channels)
                    } else {
                        data.to_vec()
                    };
                    let samples = if native_rate != target_rate {
                        downsample(&mono, native_rate, target_rate)
                    } else {
                        mono
                    };
                    chunker.push(&samples, |frame| {
                        sink.send_frame(pcm::encode_frame(frame));
                    });
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            )
            .map_err(|e| SessionError::Device(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| SessionError::Device(format!("failed to start input stream: {e}")))?;

        info!("audio capture started: native {native_rate}Hz -> target {target_rate}Hz");
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            debug!("audio capture stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

/// Capture source that drives no device, for headless operation.
#[derive(Default)]
pub struct NullCapture {
    running: bool,
    sink: Option<OutboundSender>,
}

impl NullCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink handed to `start`, for tests that inject frames.
    pub fn sink(&self) -> Option<OutboundSender> {
        self.sink.clone()
    }
}

impl CaptureSource for NullCapture {
    fn start(&mut self, sink: OutboundSender) -> Result<()> {
        if !self.running {
            self.running = true;
            self.sink = Some(sink);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
        self.sink = None;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation downsampler. For speech (48 kHz → 16 kHz) this is
/// sufficient quality; speech energy sits below 8 kHz.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };

        output.push(sample as f32);
    }

    output
}
