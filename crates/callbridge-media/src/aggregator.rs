//! Utterance aggregation — turns final transcripts into engine dispatches.
//!
//! Stateless filter over transcript events. A final event with non-empty text
//! produces exactly one spoken filler (masking decision-engine latency) and
//! exactly one utterance dispatch, filler first. Everything else is ignored.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use tracing::{debug, warn};

use callbridge_core::engine::{DecisionEngine, SpeechSink, UtteranceRequest};
use callbridge_core::protocol::TranscriptEvent;
use callbridge_core::Result;

pub struct UtteranceAggregator {
    session_id: String,
    fillers: Vec<String>,
    sink: Arc<dyn SpeechSink>,
    engine: Arc<dyn DecisionEngine>,
}

impl UtteranceAggregator {
    pub fn new(
        session_id: impl Into<String>,
        fillers: Vec<String>,
        sink: Arc<dyn SpeechSink>,
        engine: Arc<dyn DecisionEngine>,
    ) -> Self {
        debug_assert!(!fillers.is_empty());
        Self {
            session_id: session_id.into(),
            fillers,
            sink,
            engine,
        }
    }

    fn pick_filler(&self) -> String {
        self.fillers
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_default()
    }

    /// Process one transcript event. Returns the dispatched utterance, if any.
    pub async fn on_event(&self, event: &TranscriptEvent) -> Result<Option<UtteranceRequest>> {
        if !event.is_final {
            return Ok(None);
        }
        let text = event.transcript.trim();
        if text.is_empty() {
            return Ok(None);
        }

        debug!(
            session_id = %self.session_id,
            confidence = ?event.confidence,
            "Final transcript: {text}"
        );

        // Filler first: enqueued for playback before the engine is consulted.
        let filler = self.pick_filler();
        if let Err(e) = self.sink.speak(&self.session_id, &filler).await {
            // Session already closing; nothing left to dispatch to.
            warn!(session_id = %self.session_id, %e, "Could not speak filler");
            return Ok(None);
        }

        let request = UtteranceRequest {
            session_id: self.session_id.clone(),
            text: text.to_string(),
            filler_text: filler,
        };

        if let Err(e) = self
            .engine
            .dispatch_utterance(&request.session_id, &request.text)
            .await
        {
            // Engine failures are logged and do not tear down the call.
            warn!(session_id = %self.session_id, %e, "Decision engine dispatch failed");
        }

        Ok(Some(request))
    }
}
