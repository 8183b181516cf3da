//! Command-line voice session client.
//!
//! Connects to the configured conversational audio service, streams the
//! microphone, plays replies, and prints the transcript as it forms.
//! Ctrl-C stops the session cleanly.

use std::path::PathBuf;

use viva::{Author, SessionConfig, SessionEvent, SessionFactory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Transcript output goes to stdout; everything else to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    tracing::info!("connecting to {}", config.transport.url);

    let factory = SessionFactory::new(config);
    let session = factory.start().await?;
    let mut events = session.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("stopping session");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::StateChanged(state)) => {
                        tracing::info!("session state: {state}");
                    }
                    Ok(SessionEvent::TurnCommitted(entries)) => {
                        for entry in entries {
                            let who = match entry.author {
                                Author::User => "you",
                                Author::Model => "model",
                            };
                            println!("{who}: {}", entry.text);
                        }
                    }
                    Ok(SessionEvent::Error { message }) => {
                        tracing::error!("session error: {message}");
                        break;
                    }
                    Ok(SessionEvent::PartialTranscript { .. }) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("dropped {n} session events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    session.stop().await;
    tracing::info!("session closed");
    Ok(())
}

fn load_config() -> anyhow::Result<SessionConfig> {
    if let Some(path) = std::env::args_os().nth(1) {
        return Ok(SessionConfig::from_file(PathBuf::from(path))?);
    }
    if let Some(path) = SessionConfig::default_config_path() {
        if path.exists() {
            return Ok(SessionConfig::from_file(path)?);
        }
    }
    Ok(SessionConfig::default())
}
