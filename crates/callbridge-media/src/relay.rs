//! Speech-recognition relay — one duplex streaming connection per call.
//!
//! The sender half drains the session's bounded audio outbox in FIFO order;
//! the receiver half parses transcript events and forwards them. The
//! connection is opened lazily on the first flushed chunk. Any connection
//! failure (including the connect timeout) is fatal to the session: the relay
//! cancels the session token and no retry is attempted.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use callbridge_core::config::RecognitionConfig;
use callbridge_core::protocol::{parse_transcript_event, TranscriptEvent};
use callbridge_core::{BridgeError, Result};

pub type RecognitionStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the connection request, attaching the API key header if configured.
pub fn build_request(config: &RecognitionConfig) -> Result<Request> {
    let mut request = config
        .url
        .clone()
        .into_client_request()
        .map_err(|e| BridgeError::Connection(format!("bad recognition URL: {e}")))?;

    if let Some(key) = config.resolve_api_key() {
        let value = HeaderValue::from_str(&format!("Token {key}"))
            .map_err(|e| BridgeError::Connection(format!("bad API key header: {e}")))?;
        request.headers_mut().insert("Authorization", value);
    }

    Ok(request)
}

/// Open the duplex recognition connection, bounded by the configured timeout.
pub async fn connect(config: &RecognitionConfig) -> Result<RecognitionStream> {
    let request = build_request(config)?;
    let timeout = Duration::from_millis(config.connect_timeout_ms);

    let (ws, _) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| {
            BridgeError::Connection(format!(
                "recognition connect timed out after {}ms",
                config.connect_timeout_ms
            ))
        })?
        .map_err(|e| BridgeError::Connection(format!("recognition connect failed: {e}")))?;

    Ok(ws)
}

/// Run the relay for one session.
///
/// Waits for the first audio chunk before connecting, then forwards chunks in
/// arrival order while parsing transcript events off the same connection.
/// Ends when the session is cancelled, the outbox closes, or the connection
/// fails; failure cancels the session token.
pub fn spawn_relay(
    config: RecognitionConfig,
    audio_rx: mpsc::Receiver<Vec<u8>>,
    transcript_tx: mpsc::UnboundedSender<TranscriptEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_relay(config, audio_rx, transcript_tx, cancel).await;
    })
}

async fn run_relay(
    config: RecognitionConfig,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    transcript_tx: mpsc::UnboundedSender<TranscriptEvent>,
    cancel: CancellationToken,
) {
    // Lazy open: no audio, no connection.
    let first_chunk = tokio::select! {
        _ = cancel.cancelled() => return,
        chunk = audio_rx.recv() => match chunk {
            Some(chunk) => chunk,
            None => {
                debug!("Audio outbox closed before any chunk; relay never connected");
                return;
            }
        },
    };

    let ws = match connect(&config).await {
        Ok(ws) => ws,
        Err(e) => {
            error!(%e, "Recognition connection failed, tearing down session");
            cancel.cancel();
            return;
        }
    };
    info!("Recognition connection established");

    let (mut ws_tx, mut ws_rx) = ws.split();

    let recv_cancel = cancel.clone();
    let recv_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = recv_cancel.cancelled() => break,
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => match parse_transcript_event(text.as_str()) {
                        Ok(event) => {
                            if transcript_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(%e, "Unparsable recognition message, skipping"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        if !recv_cancel.is_cancelled() {
                            error!("Recognition connection closed mid-call");
                            recv_cancel.cancel();
                        }
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        if !recv_cancel.is_cancelled() {
                            error!(%e, "Recognition connection error");
                            recv_cancel.cancel();
                        }
                        break;
                    }
                },
            }
        }
    });

    // Sender loop: FIFO, never drops. The bounded outbox suspends the framer
    // when full; that is the backpressure mechanism.
    let mut pending = Some(first_chunk);
    loop {
        let chunk = match pending.take() {
            Some(chunk) => chunk,
            None => tokio::select! {
                // Drain what was queued before cancellation so a trailing
                // end-of-stream flush still reaches the recognition service.
                _ = cancel.cancelled() => match audio_rx.try_recv() {
                    Ok(chunk) => chunk,
                    Err(_) => break,
                },
                chunk = audio_rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            },
        };

        if let Err(e) = ws_tx.send(Message::Binary(chunk.into())).await {
            error!(%e, "Failed to forward audio chunk, tearing down session");
            cancel.cancel();
            break;
        }
    }

    // Single owner of the sender half: the connection is closed exactly once.
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = recv_task.await;
    debug!("Recognition relay finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(url: &str, timeout_ms: u64) -> RecognitionConfig {
        RecognitionConfig {
            url: url.into(),
            api_key: Some("dg-key".into()),
            api_key_env: None,
            connect_timeout_ms: timeout_ms,
        }
    }

    #[test]
    fn test_build_request_sets_auth_header() {
        let config = test_config("wss://api.example.com/v1/listen?encoding=mulaw", 5000);
        let request = build_request(&config).unwrap();
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Token dg-key"
        );
        assert_eq!(request.uri().host(), Some("api.example.com"));
    }

    #[test]
    fn test_build_request_without_key() {
        let config = RecognitionConfig {
            url: "ws://localhost:9999/listen".into(),
            api_key: None,
            api_key_env: None,
            connect_timeout_ms: 5000,
        };
        let request = build_request(&config).unwrap();
        assert!(request.headers().get("Authorization").is_none());
    }

    #[test]
    fn test_build_request_bad_url() {
        let config = test_config("not a url", 5000);
        let err = build_request(&config).unwrap_err();
        assert!(matches!(err, BridgeError::Connection(_)));
    }

    #[tokio::test]
    async fn test_connect_timeout_is_connection_error() {
        // A listener that accepts TCP but never answers the WS handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = test_config(&format!("ws://{addr}/listen"), 100);
        let err = connect(&config).await.unwrap_err();
        assert!(matches!(err, BridgeError::Connection(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_relay_never_connects_without_audio() {
        // Invalid endpoint: if the relay tried to connect this would cancel
        // the token. Closing the outbox first must end the task cleanly.
        let config = test_config("ws://127.0.0.1:1/listen", 100);
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(4);
        let (transcript_tx, _transcript_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = spawn_relay(config, audio_rx, transcript_tx, cancel.clone());
        drop(audio_tx);
        handle.await.unwrap();
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_queued_chunk_survives_cancellation() {
        // A recognition stand-in that reports every binary chunk it receives.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<usize>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Binary(chunk) => {
                        let _ = seen_tx.send(chunk.len());
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        let mut config = test_config(&format!("ws://{addr}/listen"), 1_000);
        config.api_key = None;
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(8);
        let (transcript_tx, _transcript_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = spawn_relay(config, audio_rx, transcript_tx, cancel.clone());
        audio_tx.send(vec![0xff; 3200]).await.unwrap();
        assert_eq!(seen_rx.recv().await.unwrap(), 3200);

        // The trailing sub-threshold flush, queued right before teardown,
        // must still go out.
        audio_tx.send(vec![0xff; 160]).await.unwrap();
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(seen_rx.recv().await.unwrap(), 160);
    }

    #[tokio::test]
    async fn test_failed_connect_cancels_session() {
        let config = test_config("ws://127.0.0.1:1/listen", 500);
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(4);
        let (transcript_tx, _transcript_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = spawn_relay(config, audio_rx, transcript_tx, cancel.clone());
        audio_tx.send(vec![0xff; 3200]).await.unwrap();
        handle.await.unwrap();
        assert!(cancel.is_cancelled());
    }
}
