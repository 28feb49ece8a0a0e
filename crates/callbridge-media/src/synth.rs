//! Speech synthesis — blank-line segmentation and per-segment synthesis.
//!
//! Text is split on blank-line boundaries so playback can begin before the
//! whole reply is synthesized. Segments are synthesized concurrently; each
//! outcome carries its sequence index so the dispatcher can restore order.
//! A failed segment is skipped, never the whole utterance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use callbridge_core::config::SynthesisConfig;
use callbridge_core::{BridgeError, Result};

/// One ordered unit of outgoing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment {
    pub sequence_index: usize,
    pub text: String,
}

/// Raw audio for one segment, in the call's wire encoding.
#[derive(Debug, Clone)]
pub struct SynthesizedChunk {
    pub sequence_index: usize,
    pub audio: Vec<u8>,
}

/// Result of synthesizing one segment. Skips are reported (not silently
/// dropped) so the reorderer never stalls waiting for a dead index.
#[derive(Debug)]
pub enum SegmentOutcome {
    Synthesized(SynthesizedChunk),
    Skipped { sequence_index: usize },
}

/// Split reply text into ordered segments on blank-line boundaries.
pub fn split_segments(text: &str) -> Vec<SpeechSegment> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .enumerate()
        .map(|(sequence_index, part)| SpeechSegment {
            sequence_index,
            text: part.to_string(),
        })
        .collect()
}

/// HTTP client for the synthesis service.
pub struct SynthesisClient {
    client: reqwest::Client,
    config: SynthesisConfig,
}

impl SynthesisClient {
    pub fn new(config: SynthesisConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| BridgeError::Config(format!("synthesis client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Synthesize one segment into raw audio bytes.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let mut request = self.client.post(&self.config.url).json(&serde_json::json!({
            "text": text,
            "voice": self.config.voice,
        }));

        if let Some(key) = self.config.resolve_api_key() {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| BridgeError::Synthesis(format!("synthesis request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Synthesis(format!(
                "synthesis API error {status}: {body}"
            )));
        }

        let audio = resp
            .bytes()
            .await
            .map_err(|e| BridgeError::Synthesis(format!("synthesis body error: {e}")))?;

        if audio.is_empty() {
            return Err(BridgeError::Synthesis("synthesis returned no audio".into()));
        }

        Ok(audio.to_vec())
    }
}

/// Synthesize all segments concurrently. Outcomes arrive on the returned
/// channel as each segment completes, in completion order, tagged with the
/// segment's sequence index.
pub fn spawn_segment_synthesis(
    client: Arc<SynthesisClient>,
    segments: Vec<SpeechSegment>,
) -> mpsc::UnboundedReceiver<SegmentOutcome> {
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

    for segment in segments {
        let client = client.clone();
        let outcome_tx = outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = match client.synthesize(&segment.text).await {
                Ok(audio) => {
                    debug!(
                        sequence_index = segment.sequence_index,
                        bytes = audio.len(),
                        "Segment synthesized"
                    );
                    SegmentOutcome::Synthesized(SynthesizedChunk {
                        sequence_index: segment.sequence_index,
                        audio,
                    })
                }
                Err(e) => {
                    // Partial delivery beats total failure: skip this segment only.
                    warn!(sequence_index = segment.sequence_index, %e, "Segment skipped");
                    SegmentOutcome::Skipped {
                        sequence_index: segment.sequence_index,
                    }
                }
            };
            let _ = outcome_tx.send(outcome);
        });
    }

    outcome_rx
}
