//! Session controller: wires capture, transport, playback and transcripts
//! together behind a single dispatch task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audio::capture::{CaptureSource, MicCapture};
use crate::audio::playback::{OutputSink, PlaybackScheduler, SourceId, SpeakerOutput};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::pcm;
use crate::session::events::{SessionEvent, SessionState, EVENT_BUFFER};
use crate::transcript::{Author, TranscriptAggregator};
use crate::transport::{TransportEvent, TransportSession};

/// Creates sessions, enforcing at most one live session at a time.
pub struct SessionFactory {
    config: SessionConfig,
    active: Arc<AtomicBool>,
}

impl SessionFactory {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a session against the real microphone and speakers.
    pub async fn start(&self) -> Result<Session> {
        self.start_with_io(
            Box::new(MicCapture::new(self.config.audio.clone())),
            Box::new(SpeakerOutput::new(self.config.audio.clone())),
        )
        .await
    }

    /// Start a session with caller-supplied audio endpoints. Used for
    /// headless operation and tests.
    pub async fn start_with_io(
        &self,
        capture: Box<dyn CaptureSource>,
        output: Box<dyn OutputSink>,
    ) -> Result<Session> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::Session("a session is already active".into()));
        }

        let (transport, transport_rx) =
            match TransportSession::connect(&self.config.transport, &self.config.conversation)
                .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    self.active.store(false, Ordering::Release);
                    return Err(e);
                }
            };

        let state = Arc::new(Mutex::new(SessionState::Connecting));
        let last_error = Arc::new(Mutex::new(None));
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let (scheduler, done_rx) = PlaybackScheduler::new();

        let task = SessionTask {
            transport,
            transport_rx,
            capture,
            output,
            scheduler,
            done_rx,
            aggregator: TranscriptAggregator::new(),
            output_sample_rate: self.config.audio.output_sample_rate,
            state: Arc::clone(&state),
            last_error: Arc::clone(&last_error),
            events_tx: events_tx.clone(),
            active: Arc::clone(&self.active),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());

        Ok(Session {
            cancel,
            events_tx,
            state,
            last_error,
            task: AsyncMutex::new(Some(handle)),
        })
    }
}

/// Handle to a running session.
#[derive(Debug)]
pub struct Session {
    cancel: CancellationToken,
    events_tx: broadcast::Sender<SessionEvent>,
    state: Arc<Mutex<SessionState>>,
    last_error: Arc<Mutex<Option<String>>>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        match self.state.lock() {
            Ok(s) => *s,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// The fault that ended the session, when in the error state.
    pub fn last_error(&self) -> Option<String> {
        match self.last_error.lock() {
            Ok(e) => e.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stop the session and wait for teardown to finish. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }
}

struct SessionTask {
    transport: TransportSession,
    transport_rx: mpsc::Receiver<TransportEvent>,
    capture: Box<dyn CaptureSource>,
    output: Box<dyn OutputSink>,
    scheduler: PlaybackScheduler,
    done_rx: mpsc::UnboundedReceiver<SourceId>,
    aggregator: TranscriptAggregator,
    output_sample_rate: u32,
    state: Arc<Mutex<SessionState>>,
    last_error: Arc<Mutex<Option<String>>>,
    events_tx: broadcast::Sender<SessionEvent>,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.teardown(SessionState::Idle);
                    return;
                }
                done = self.done_rx.recv() => {
                    if let Some(id) = done {
                        if self.scheduler.complete(id) {
                            self.set_state(SessionState::Listening);
                        }
                    }
                }
                event = self.transport_rx.recv() => {
                    match event {
                        Some(ev) => {
                            if self.handle(ev) {
                                return;
                            }
                        }
                        None => {
                            self.teardown(SessionState::Idle);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Handle one transport event. Returns true when the session ended.
    fn handle(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Opened => {
                if let Err(e) = self.capture.start(self.transport.sender()) {
                    self.fail(e.to_string());
                    return true;
                }
                self.set_state(SessionState::Listening);
            }
            TransportEvent::AudioChunk { data } => {
                let buffer = pcm::from_base64(&data)
                    .and_then(|bytes| pcm::decode_chunk(&bytes, self.output_sample_rate, 1));
                let buffer = match buffer {
                    Ok(b) => b,
                    Err(e) => {
                        // A bad chunk is skipped; the next one lands where
                        // this one would have.
                        warn!("skipping undecodable audio chunk: {e}");
                        return false;
                    }
                };
                if !self.output.is_open() {
                    if let Err(e) = self.output.open(self.scheduler.timeline()) {
                        self.fail(e.to_string());
                        return true;
                    }
                }
                self.scheduler.schedule(buffer.into_mono());
                self.set_state(SessionState::Speaking);
            }
            TransportEvent::InputTranscript { text } => {
                self.aggregator.push_fragment(Author::User, &text);
                let _ = self.events_tx.send(SessionEvent::PartialTranscript {
                    author: Author::User,
                    text: self.aggregator.interim(Author::User).to_string(),
                });
            }
            TransportEvent::OutputTranscript { text } => {
                self.aggregator.push_fragment(Author::Model, &text);
                let _ = self.events_tx.send(SessionEvent::PartialTranscript {
                    author: Author::Model,
                    text: self.aggregator.interim(Author::Model).to_string(),
                });
            }
            TransportEvent::TurnComplete => {
                let appended = self.aggregator.complete_turn();
                if !appended.is_empty() {
                    let _ = self.events_tx.send(SessionEvent::TurnCommitted(appended));
                }
            }
            TransportEvent::Interrupted => {
                self.scheduler.interrupt();
                self.set_state(SessionState::Listening);
            }
            TransportEvent::Error { message } => {
                self.fail(message);
                return true;
            }
            TransportEvent::Closed => {
                self.teardown(SessionState::Idle);
                return true;
            }
        }
        false
    }

    /// Record a fault, surface it, and tear down into the error state. The
    /// message stays readable on the session handle until the handle drops.
    fn fail(&mut self, message: String) {
        warn!("session fault: {message}");
        {
            let mut last = match self.last_error.lock() {
                Ok(e) => e,
                Err(poisoned) => poisoned.into_inner(),
            };
            *last = Some(message.clone());
        }
        let _ = self.events_tx.send(SessionEvent::Error { message });
        self.teardown(SessionState::Error);
    }

    fn set_state(&self, new: SessionState) {
        let changed = {
            let mut state = match self.state.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *state == new {
                false
            } else {
                *state = new;
                true
            }
        };
        if changed {
            let _ = self.events_tx.send(SessionEvent::StateChanged(new));
        }
    }

    /// Ordered teardown: stop sending, stop capturing, silence playback,
    /// release the output device.
    fn teardown(&mut self, final_state: SessionState) {
        self.transport.close();
        self.capture.stop();
        self.scheduler.interrupt();
        self.output.close();
        self.set_state(final_state);
        self.active.store(false, Ordering::Release);
        info!("session ended: {final_state}");
    }
}
