//! WebSocket transport to the conversational audio service.
//!
//! A single connection per session: open, send the setup message, then relay
//! outbound audio frames and inbound service events until either side closes.
//! There is no reconnect — a dropped connection ends the session.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConversationConfig, TransportConfig};
use crate::error::{Result, SessionError};
use crate::pcm;

/// Capacity of the outbound audio frame channel. When the transport cannot
/// keep up, the oldest pending frames stay queued and new frames are dropped.
pub const OUTBOUND_CHANNEL_SIZE: usize = 64;

/// Capacity of the inbound event channel.
pub const EVENT_CHANNEL_SIZE: usize = 64;

/// MIME tag attached to every outbound audio frame.
pub const OUTBOUND_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// Messages sent to the service.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Setup { config: SetupConfig },
    Audio { data: String, mime_type: String },
}

#[derive(Debug, Serialize)]
struct SetupConfig {
    system_instructions: String,
    voice: String,
    response_modality: String,
    transcription: TranscriptionConfig,
}

#[derive(Debug, Serialize)]
struct TranscriptionConfig {
    input: bool,
    output: bool,
}

/// Messages received from the service.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    SetupComplete {},
    AudioChunk {
        data: String,
    },
    InputTranscript {
        text: String,
    },
    OutputTranscript {
        text: String,
    },
    TurnComplete {},
    Interrupted {},
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Events surfaced to the session controller.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Setup negotiation finished; the service is ready for audio.
    Opened,
    /// Base64-wrapped PCM audio to play.
    AudioChunk { data: String },
    /// Transcription fragment of the user's captured speech.
    InputTranscript { text: String },
    /// Transcription fragment of the model's reply.
    OutputTranscript { text: String },
    /// The current conversational turn finished.
    TurnComplete,
    /// The user barged in; discard queued playback.
    Interrupted,
    /// The service or transport reported a fault.
    Error { message: String },
    /// The connection closed.
    Closed,
}

/// Clone-able handle used by the capture path to push audio frames.
#[derive(Clone, Debug)]
pub struct OutboundSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl OutboundSender {
    /// Queue a raw PCM frame for sending. If the channel is full the frame
    /// is dropped; realtime audio must not block the capture callback.
    pub fn send_frame(&self, pcm_bytes: Vec<u8>) {
        if let Err(e) = self.tx.try_send(pcm_bytes) {
            debug!("dropping outbound audio frame: {e}");
        }
    }

    #[cfg(test)]
    pub(crate) fn test_handle(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

/// A live connection to the service.
#[derive(Debug)]
pub struct TransportSession {
    outbound: OutboundSender,
    cancel: CancellationToken,
}

impl TransportSession {
    /// Connect, spawn the channel task, and return the session handle along
    /// with the inbound event receiver.
    pub async fn connect(
        transport: &TransportConfig,
        conversation: &ConversationConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let url = url::Url::parse(&transport.url)
            .map_err(|e| SessionError::Connect(format!("invalid url {}: {e}", transport.url)))?;

        info!("connecting to {url}");
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let setup = ClientMessage::Setup {
            config: SetupConfig {
                system_instructions: conversation.system_instructions.clone(),
                voice: conversation.voice.as_str().to_string(),
                response_modality: "audio".to_string(),
                transcription: TranscriptionConfig {
                    input: conversation.transcribe_input,
                    output: conversation.transcribe_output,
                },
            },
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let cancel = CancellationToken::new();

        tokio::spawn(run_channel(ws, setup, outbound_rx, event_tx, cancel.clone()));

        Ok((
            Self {
                outbound: OutboundSender { tx: outbound_tx },
                cancel,
            },
            event_rx,
        ))
    }

    /// Handle for pushing outbound audio frames.
    pub fn sender(&self) -> OutboundSender {
        self.outbound.clone()
    }

    /// Request an orderly close. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

async fn run_channel(
    mut ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    setup: ClientMessage,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    event_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) {
    let setup_text = match serde_json::to_string(&setup) {
        Ok(t) => t,
        Err(e) => {
            let _ = event_tx
                .send(TransportEvent::Error {
                    message: format!("setup serialization failed: {e}"),
                })
                .await;
            return;
        }
    };
    if let Err(e) = ws.send(Message::Text(setup_text.into())).await {
        let _ = event_tx
            .send(TransportEvent::Error {
                message: format!("setup send failed: {e}"),
            })
            .await;
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.send(Message::Close(None)).await;
                let _ = event_tx.send(TransportEvent::Closed).await;
                return;
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_server_message(&text) {
                            let is_error = matches!(event, TransportEvent::Error { .. });
                            let _ = event_tx.send(event).await;
                            if is_error {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("websocket read error: {e}");
                        let _ = event_tx
                            .send(TransportEvent::Error { message: e.to_string() })
                            .await;
                        return;
                    }
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(pcm_bytes) => {
                        let msg = ClientMessage::Audio {
                            data: pcm::to_base64(&pcm_bytes),
                            mime_type: OUTBOUND_AUDIO_MIME.to_string(),
                        };
                        let text = match serde_json::to_string(&msg) {
                            Ok(t) => t,
                            Err(e) => {
                                debug!("audio serialization failed: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws.send(Message::Text(text.into())).await {
                            let _ = event_tx
                                .send(TransportEvent::Error { message: e.to_string() })
                                .await;
                            return;
                        }
                    }
                    None => {
                        let _ = ws.send(Message::Close(None)).await;
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                }
            }
        }
    }
}

fn parse_server_message(text: &str) -> Option<TransportEvent> {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("ignoring unparseable service message: {e}");
            return None;
        }
    };
    Some(match msg {
        ServerMessage::SetupComplete {} => TransportEvent::Opened,
        ServerMessage::AudioChunk { data } => TransportEvent::AudioChunk { data },
        ServerMessage::InputTranscript { text } => TransportEvent::InputTranscript { text },
        ServerMessage::OutputTranscript { text } => TransportEvent::OutputTranscript { text },
        ServerMessage::TurnComplete {} => TransportEvent::TurnComplete,
        ServerMessage::Interrupted {} => TransportEvent::Interrupted,
        ServerMessage::Error { message } => TransportEvent::Error { message },
    })
}
