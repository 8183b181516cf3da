//! Playback scheduling with gapless back-to-back chunks and barge-in.
//!
//! Chunks are scheduled on a logical sample clock rather than wall time: each
//! new chunk starts at `max(next_start, playhead)`, so consecutive chunks butt
//! up seamlessly while a chunk arriving after an idle gap starts immediately.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::audio::SendableStream;
use crate::config::AudioConfig;
use crate::error::{Result, SessionError};

/// Identifier for a scheduled playback source.
pub type SourceId = u64;

struct Source {
    id: SourceId,
    start: u64,
    samples: Vec<f32>,
}

struct TimelineInner {
    /// Logical output clock in samples. Advances only while rendering.
    playhead: u64,
    sources: Vec<Source>,
}

/// Shared mixing timeline read by the output device callback.
pub struct Timeline {
    inner: Mutex<TimelineInner>,
    done_tx: mpsc::UnboundedSender<SourceId>,
}

impl Timeline {
    fn new(done_tx: mpsc::UnboundedSender<SourceId>) -> Self {
        Self {
            inner: Mutex::new(TimelineInner {
                playhead: 0,
                sources: Vec::new(),
            }),
            done_tx,
        }
    }

    /// Current playhead position in samples.
    pub fn position(&self) -> u64 {
        match self.inner.lock() {
            Ok(inner) => inner.playhead,
            Err(poisoned) => poisoned.into_inner().playhead,
        }
    }

    fn add_source(&self, id: SourceId, start: u64, samples: Vec<f32>) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.sources.push(Source { id, start, samples });
    }

    /// Discard all scheduled sources. Their completions are never reported.
    fn clear(&self) {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.sources.clear();
    }

    /// Mix all scheduled sources into `out` and advance the playhead by
    /// `out.len()` samples. Finished sources are reported on the completion
    /// channel. Called from the output device callback.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let block_start = inner.playhead;
        let block_end = block_start + out.len() as u64;

        let mut finished = Vec::new();
        for src in &inner.sources {
            let src_end = src.start + src.samples.len() as u64;
            if src_end <= block_start || src.start >= block_end {
                if src_end <= block_start {
                    finished.push(src.id);
                }
                continue;
            }
            let from = block_start.max(src.start);
            let to = block_end.min(src_end);
            for t in from..to {
                let out_idx = (t - block_start) as usize;
                let src_idx = (t - src.start) as usize;
                out[out_idx] += src.samples[src_idx];
            }
            if src_end <= block_end {
                finished.push(src.id);
            }
        }
        inner.playhead = block_end;
        inner.sources.retain(|s| !finished.contains(&s.id));
        drop(inner);

        for id in finished {
            let _ = self.done_tx.send(id);
        }
    }
}

/// Schedules inbound audio chunks on the timeline and tracks which are live.
pub struct PlaybackScheduler {
    timeline: Arc<Timeline>,
    next_start: u64,
    playing: HashSet<SourceId>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    /// Create a scheduler and the completion receiver fed by the timeline.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SourceId>) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        (
            Self {
                timeline: Arc::new(Timeline::new(done_tx)),
                next_start: 0,
                playing: HashSet::new(),
                next_id: 0,
            },
            done_rx,
        )
    }

    /// Shared timeline for the output device callback.
    pub fn timeline(&self) -> Arc<Timeline> {
        Arc::clone(&self.timeline)
    }

    /// Schedule a mono chunk. Back-to-back chunks are gapless; a chunk
    /// arriving after the queue drained resyncs to the current playhead.
    pub fn schedule(&mut self, samples: Vec<f32>) -> SourceId {
        let start = self.next_start.max(self.timeline.position());
        let id = self.next_id;
        self.next_id += 1;
        let len = samples.len() as u64;
        self.timeline.add_source(id, start, samples);
        self.playing.insert(id);
        self.next_start = start + len;
        id
    }

    /// Record that a source finished. Returns true when this was the last
    /// live source. Stale ids (already interrupted) are ignored.
    pub fn complete(&mut self, id: SourceId) -> bool {
        self.playing.remove(&id) && self.playing.is_empty()
    }

    /// Barge-in: drop every scheduled source and reset the schedule origin.
    /// Returns the number of sources discarded.
    pub fn interrupt(&mut self) -> usize {
        self.timeline.clear();
        let discarded = self.playing.len();
        self.playing.clear();
        self.next_start = 0;
        if discarded > 0 {
            debug!("interrupted playback, discarded {discarded} sources");
        }
        discarded
    }

    /// True when nothing is scheduled or playing.
    pub fn is_silent(&self) -> bool {
        self.playing.is_empty()
    }

    /// Sample position where the next chunk would be placed.
    pub fn next_start(&self) -> u64 {
        self.next_start
    }
}

/// Destination for rendered audio.
pub trait OutputSink: Send {
    /// Start delivering timeline audio to the device. Idempotent.
    fn open(&mut self, timeline: Arc<Timeline>) -> Result<()>;
    /// Stop delivery. Idempotent.
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

/// Real speaker output via cpal.
pub struct SpeakerOutput {
    config: AudioConfig,
    stream: Option<SendableStream>,
}

impl SpeakerOutput {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }
}

impl OutputSink for SpeakerOutput {
    fn open(&mut self, timeline: Arc<Timeline>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = match &self.config.output_device {
            Some(name) => host
                .output_devices()
                .map_err(|e| SessionError::Device(e.to_string()))?
                .find(|d| {
                    d.description()
                        .map(|desc| desc.name().contains(name.as_str()))
                        .unwrap_or(false)
                })
                .ok_or_else(|| SessionError::Device(format!("output device '{name}' not found")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| SessionError::Device("no default output device".into()))?,
        };

        if let Ok(desc) = device.description() {
            info!("opening output device: {}", desc.name());
        }

        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: self.config.output_sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    timeline.render(data);
                },
                |e| debug!("output stream error: {e}"),
                None,
            )
            .map_err(|e| SessionError::Device(e.to_string()))?;
        stream
            .play()
            .map_err(|e| SessionError::Device(e.to_string()))?;

        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Output sink that holds a timeline but drives no device. The timeline is
/// advanced by calling [`Timeline::render`] directly.
#[derive(Default)]
pub struct NullOutput {
    timeline: Option<Arc<Timeline>>,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeline handed over by `open`, for tests that drive rendering.
    pub fn timeline(&self) -> Option<Arc<Timeline>> {
        self.timeline.clone()
    }
}

impl OutputSink for NullOutput {
    fn open(&mut self, timeline: Arc<Timeline>) -> Result<()> {
        if self.timeline.is_none() {
            self.timeline = Some(timeline);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.timeline = None;
    }

    fn is_open(&self) -> bool {
        self.timeline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SourceId>) -> Vec<SourceId> {
        let mut out = Vec::new();
        while let Ok(id) = rx.try_recv() {
            out.push(id);
        }
        out
    }

    #[test]
    fn back_to_back_chunks_are_gapless() {
        let (mut sched, _rx) = PlaybackScheduler::new();
        let starts: Vec<u64> = [1200usize, 480, 2400, 960]
            .iter()
            .map(|&len| {
                let before = sched.next_start();
                sched.schedule(vec![0.0; len]);
                before
            })
            .collect();
        assert_eq!(starts, vec![0, 1200, 1680, 4080]);
    }

    #[test]
    fn chunk_after_idle_gap_resyncs_to_playhead() {
        let (mut sched, _rx) = PlaybackScheduler::new();
        sched.schedule(vec![0.0; 100]);
        let timeline = sched.timeline();
        // Render well past the end of the chunk.
        let mut block = vec![0.0f32; 500];
        timeline.render(&mut block);
        assert_eq!(timeline.position(), 500);

        sched.schedule(vec![0.0; 10]);
        assert_eq!(sched.next_start(), 510);
    }

    #[test]
    fn interrupt_discards_everything() {
        let (mut sched, mut rx) = PlaybackScheduler::new();
        sched.schedule(vec![0.0; 100]);
        sched.schedule(vec![0.0; 100]);
        assert_eq!(sched.interrupt(), 2);
        assert!(sched.is_silent());
        assert_eq!(sched.next_start(), 0);

        // Nothing left on the timeline: render produces silence and no
        // completion events.
        let mut block = vec![1.0f32; 64];
        sched.timeline().render(&mut block);
        assert!(block.iter().all(|&s| s == 0.0));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn schedule_after_interrupt_starts_at_playhead() {
        let (mut sched, _rx) = PlaybackScheduler::new();
        sched.schedule(vec![0.0; 1000]);
        let timeline = sched.timeline();
        let mut block = vec![0.0f32; 400];
        timeline.render(&mut block);

        sched.interrupt();
        sched.schedule(vec![0.0; 10]);
        // next_start reset to 0, so the new chunk snaps to the playhead.
        assert_eq!(sched.next_start(), 410);
    }

    #[test]
    fn completion_reported_exactly_once() {
        let (mut sched, mut rx) = PlaybackScheduler::new();
        let id = sched.schedule(vec![0.0; 50]);
        let timeline = sched.timeline();
        let mut block = vec![0.0f32; 64];
        timeline.render(&mut block);
        timeline.render(&mut block);
        assert_eq!(drain(&mut rx), vec![id]);
        assert!(sched.complete(id));
        assert!(sched.is_silent());
    }

    #[test]
    fn stale_completion_after_interrupt_is_ignored() {
        let (mut sched, _rx) = PlaybackScheduler::new();
        let id = sched.schedule(vec![0.0; 50]);
        sched.interrupt();
        assert!(!sched.complete(id));
    }

    #[test]
    fn render_mixes_at_scheduled_offsets() {
        let (mut sched, _rx) = PlaybackScheduler::new();
        sched.schedule(vec![0.5, 0.5]);
        sched.schedule(vec![0.25, 0.25]);
        let mut block = vec![0.0f32; 4];
        sched.timeline().render(&mut block);
        assert_eq!(block, vec![0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn skipped_chunk_does_not_perturb_schedule() {
        let (mut sched, _rx) = PlaybackScheduler::new();
        sched.schedule(vec![0.0; 100]);
        let next = sched.next_start();
        // A malformed chunk is simply never scheduled; the next good one
        // lands where the skipped one would have.
        sched.schedule(vec![0.0; 100]);
        assert_eq!(sched.next_start(), next + 100);
    }

    #[test]
    fn null_output_open_close_idempotent() {
        let (sched, _rx) = PlaybackScheduler::new();
        let mut out = NullOutput::new();
        assert!(!out.is_open());
        out.open(sched.timeline()).unwrap();
        out.open(sched.timeline()).unwrap();
        assert!(out.is_open());
        out.close();
        out.close();
        assert!(!out.is_open());
    }
}
