//! REST client for the dialogue decision engine.
//!
//! Each completed utterance is POSTed to the engine; replies come back in the
//! response body and are spoken into the originating call through the
//! [`SpeechSink`]. A missing engine URL degrades to [`NullEngine`], which logs
//! utterances and never replies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use callbridge_core::config::EngineConfig;
use callbridge_core::engine::{DecisionEngine, SpeechSink};
use callbridge_core::{BridgeError, Result};

#[derive(Debug, Serialize)]
struct EngineRequest<'a> {
    sender: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct EngineReply {
    text: String,
}

pub struct RestEngine {
    client: reqwest::Client,
    url: String,
    sink: Arc<dyn SpeechSink>,
}

impl RestEngine {
    pub fn new(config: &EngineConfig, sink: Arc<dyn SpeechSink>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| BridgeError::Config(format!("engine client: {e}")))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            sink,
        })
    }
}

#[async_trait]
impl DecisionEngine for RestEngine {
    async fn dispatch_utterance(&self, session_id: &str, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&EngineRequest {
                sender: session_id,
                message: text,
            })
            .send()
            .await
            .map_err(|e| BridgeError::Engine(format!("engine request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(BridgeError::Engine(format!(
                "engine returned {}",
                response.status()
            )));
        }

        let replies: Vec<EngineReply> = response
            .json()
            .await
            .map_err(|e| BridgeError::Engine(format!("bad engine response: {e}")))?;

        debug!(session_id, replies = replies.len(), "Engine responded");
        for reply in replies {
            if reply.text.trim().is_empty() {
                continue;
            }
            // The call may have ended while the engine was thinking; a stale
            // reply is dropped, not an error.
            if let Err(e) = self.sink.speak(session_id, &reply.text).await {
                warn!(session_id, %e, "Dropping engine reply");
                return Ok(());
            }
        }

        Ok(())
    }
}

/// Engine stand-in for when no engine URL is configured: utterances are
/// logged and dropped, so the bridge can run against recognition alone.
pub struct NullEngine;

#[async_trait]
impl DecisionEngine for NullEngine {
    async fn dispatch_utterance(&self, session_id: &str, text: &str) -> Result<()> {
        info!(session_id, text, "Utterance (no engine configured)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        spoken: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SpeechSink for RecordingSink {
        async fn speak(&self, session_id: &str, text: &str) -> Result<()> {
            self.spoken
                .lock()
                .unwrap()
                .push((session_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_null_engine_accepts_everything() {
        let engine = NullEngine;
        engine.dispatch_utterance("MZ1", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_rest_engine_unreachable_is_engine_error() {
        let sink = Arc::new(RecordingSink {
            spoken: Mutex::new(Vec::new()),
        });
        let config = EngineConfig {
            url: "http://127.0.0.1:1/respond".to_string(),
            request_timeout_ms: 500,
        };
        let engine = RestEngine::new(&config, sink.clone()).unwrap();

        let err = engine.dispatch_utterance("MZ1", "hello").await.unwrap_err();
        assert!(matches!(err, BridgeError::Engine(_)));
        assert!(sink.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rest_engine_speaks_replies_in_order() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let body = r#"[{"text":"First reply."},{"text":"Second reply."}]"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
        });

        let sink = Arc::new(RecordingSink {
            spoken: Mutex::new(Vec::new()),
        });
        let config = EngineConfig {
            url: format!("http://{addr}/respond"),
            request_timeout_ms: 2_000,
        };
        let engine = RestEngine::new(&config, sink.clone()).unwrap();

        engine.dispatch_utterance("MZ1", "what time is it").await.unwrap();

        let spoken = sink.spoken.lock().unwrap();
        assert_eq!(
            *spoken,
            vec![
                ("MZ1".to_string(), "First reply.".to_string()),
                ("MZ1".to_string(), "Second reply.".to_string()),
            ]
        );
    }
}
