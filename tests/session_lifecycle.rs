//! End-to-end session lifecycle tests against a scripted local service.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

use viva::audio::capture::NullCapture;
use viva::audio::playback::NullOutput;
use viva::{
    Author, Session, SessionConfig, SessionError, SessionEvent, SessionFactory, SessionState,
};

/// Spawn a one-shot fake service that accepts a connection, checks the setup
/// message, sends the scripted replies, then drains until the client closes.
async fn spawn_service(replies: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let setup = ws.next().await.unwrap().unwrap();
        assert!(setup.to_text().unwrap().contains(r#""type":"setup""#));

        // Give the client a moment to subscribe before events start flowing.
        sleep(Duration::from_millis(100)).await;
        for reply in replies {
            ws.send(Message::Text(reply.into())).await.unwrap();
        }
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });
    format!("ws://{addr}/live")
}

fn config_for(url: String) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.transport.url = url;
    config
}

async fn start_headless(factory: &SessionFactory) -> viva::Result<Session> {
    factory
        .start_with_io(Box::new(NullCapture::new()), Box::new(NullOutput::new()))
        .await
}

async fn wait_for_state(session: &Session, want: SessionState) {
    timeout(Duration::from_secs(5), async {
        while session.state() != want {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for {want}, current state {}",
            session.state()
        )
    });
}

fn audio_chunk_json(samples: usize) -> String {
    let bytes = viva::pcm::encode_frame(&vec![0.1f32; samples]);
    format!(
        r#"{{"type":"audio_chunk","data":"{}"}}"#,
        viva::pcm::to_base64(&bytes)
    )
}

#[tokio::test]
async fn session_reaches_listening_after_setup() {
    let url = spawn_service(vec![r#"{"type":"setup_complete"}"#.to_string()]).await;
    let factory = SessionFactory::new(config_for(url));
    let session = start_headless(&factory).await.unwrap();

    wait_for_state(&session, SessionState::Listening).await;
    session.stop().await;
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn audio_chunk_moves_session_to_speaking() {
    let url = spawn_service(vec![
        r#"{"type":"setup_complete"}"#.to_string(),
        audio_chunk_json(2400),
    ])
    .await;
    let factory = SessionFactory::new(config_for(url));
    let session = start_headless(&factory).await.unwrap();

    wait_for_state(&session, SessionState::Speaking).await;
    session.stop().await;
}

#[tokio::test]
async fn undecodable_chunk_is_skipped() {
    let url = spawn_service(vec![
        r#"{"type":"setup_complete"}"#.to_string(),
        r#"{"type":"audio_chunk","data":"@@not base64@@"}"#.to_string(),
        audio_chunk_json(2400),
    ])
    .await;
    let factory = SessionFactory::new(config_for(url));
    let session = start_headless(&factory).await.unwrap();

    // The bad chunk must not fault the session; the good one still plays.
    wait_for_state(&session, SessionState::Speaking).await;
    session.stop().await;
}

#[tokio::test]
async fn interruption_returns_to_listening() {
    let url = spawn_service(vec![
        r#"{"type":"setup_complete"}"#.to_string(),
        audio_chunk_json(24_000),
        r#"{"type":"interrupted"}"#.to_string(),
    ])
    .await;
    let factory = SessionFactory::new(config_for(url));
    let session = start_headless(&factory).await.unwrap();
    let mut events = session.subscribe();

    // Watch the transition sequence: the session must pass through Speaking
    // and come back to Listening on the interruption.
    let states = timeout(Duration::from_secs(5), async {
        let mut seen = Vec::new();
        loop {
            if let Ok(SessionEvent::StateChanged(s)) = events.recv().await {
                seen.push(s);
                if s == SessionState::Listening && seen.contains(&SessionState::Speaking) {
                    return seen;
                }
            }
        }
    })
    .await
    .expect("never returned to listening");
    assert!(states.contains(&SessionState::Speaking));
    session.stop().await;
}

#[tokio::test]
async fn turn_completion_commits_transcript() {
    let url = spawn_service(vec![
        r#"{"type":"setup_complete"}"#.to_string(),
        r#"{"type":"input_transcript","text":"hello "}"#.to_string(),
        r#"{"type":"input_transcript","text":"there"}"#.to_string(),
        r#"{"type":"output_transcript","text":"hi!"}"#.to_string(),
        r#"{"type":"turn_complete"}"#.to_string(),
    ])
    .await;
    let factory = SessionFactory::new(config_for(url));
    let session = start_headless(&factory).await.unwrap();
    let mut events = session.subscribe();

    let entries = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SessionEvent::TurnCommitted(entries)) = events.recv().await {
                return entries;
            }
        }
    })
    .await
    .expect("no turn committed");

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].author, Author::User);
    assert_eq!(entries[0].text, "hello there");
    assert_eq!(entries[1].author, Author::Model);
    assert_eq!(entries[1].text, "hi!");
    session.stop().await;
}

#[tokio::test]
async fn second_start_is_rejected_while_active() {
    let url = spawn_service(vec![r#"{"type":"setup_complete"}"#.to_string()]).await;
    let factory = SessionFactory::new(config_for(url));
    let session = start_headless(&factory).await.unwrap();

    let err = start_headless(&factory).await.unwrap_err();
    assert!(matches!(err, SessionError::Session(_)));

    session.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let url = spawn_service(vec![r#"{"type":"setup_complete"}"#.to_string()]).await;
    let factory = SessionFactory::new(config_for(url));
    let session = start_headless(&factory).await.unwrap();

    wait_for_state(&session, SessionState::Listening).await;
    session.stop().await;
    session.stop().await;
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn service_error_ends_session_in_error_state() {
    let url = spawn_service(vec![
        r#"{"type":"setup_complete"}"#.to_string(),
        r#"{"type":"error","message":"quota exceeded"}"#.to_string(),
    ])
    .await;
    let factory = SessionFactory::new(config_for(url));
    let session = start_headless(&factory).await.unwrap();
    let mut events = session.subscribe();

    wait_for_state(&session, SessionState::Error).await;
    let saw_error = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Error { message }) => return message,
                Ok(_) => {}
                Err(_) => return String::new(),
            }
        }
    })
    .await
    .unwrap_or_default();
    assert_eq!(saw_error, "quota exceeded");
    assert_eq!(session.last_error().as_deref(), Some("quota exceeded"));

    // The fault released the single-flight guard: a new session may start.
    let url = spawn_service(vec![r#"{"type":"setup_complete"}"#.to_string()]).await;
    let factory = SessionFactory::new(config_for(url));
    let session = start_headless(&factory).await.unwrap();
    wait_for_state(&session, SessionState::Listening).await;
    session.stop().await;
}

#[tokio::test]
async fn connect_failure_releases_single_flight_guard() {
    let factory = SessionFactory::new(config_for("ws://127.0.0.1:9/live".to_string()));
    let err = start_headless(&factory).await.unwrap_err();
    assert!(matches!(err, SessionError::Connect(_)));

    // The failed attempt must not block the next one.
    let err = start_headless(&factory).await.unwrap_err();
    assert!(matches!(err, SessionError::Connect(_)));
}

#[tokio::test]
async fn remote_close_returns_session_to_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.next().await; // setup
        let _ = ws
            .send(Message::Text(r#"{"type":"setup_complete"}"#.into()))
            .await;
        sleep(Duration::from_millis(100)).await;
        let _ = ws.close(None).await;
    });

    let factory = SessionFactory::new(config_for(format!("ws://{addr}/live")));
    let session = start_headless(&factory).await.unwrap();
    wait_for_state(&session, SessionState::Idle).await;
}
