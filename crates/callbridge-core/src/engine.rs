//! The two-call contract with the dialogue decision engine.
//!
//! The bridge calls [`DecisionEngine::dispatch_utterance`] with each completed
//! utterance, and the engine (or anything else) speaks back through
//! [`SpeechSink::speak`]. No other coupling exists between the bridge and the
//! business-logic system.

use async_trait::async_trait;

use crate::error::Result;

/// A completed utterance handed to the decision engine, alongside the filler
/// phrase already being spoken to mask engine latency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtteranceRequest {
    pub session_id: String,
    pub text: String,
    pub filler_text: String,
}

/// Consumes completed utterances. Implemented by the dialogue engine boundary.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn dispatch_utterance(&self, session_id: &str, text: &str) -> Result<()>;
}

/// Speaks text into an active call. Implemented by the session registry.
#[async_trait]
pub trait SpeechSink: Send + Sync {
    async fn speak(&self, session_id: &str, text: &str) -> Result<()>;
}
