//! Session registry — create/lookup/remove, keyed by stream id.
//!
//! The registry is the only state shared across sessions, and it shares no
//! buffers: each entry is an independent session. It also implements
//! [`SpeechSink`], routing `speak` calls to the owning session's queue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use callbridge_core::engine::SpeechSink;
use callbridge_core::{BridgeError, Result};

use crate::session::CallSession;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<CallSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, session: Arc<CallSession>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(BridgeError::Session(format!(
                "duplicate session id: {}",
                session.session_id
            )));
        }
        debug!(session_id = %session.session_id, "Session registered");
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<CallSession>> {
        let removed = self.sessions.write().await.remove(session_id);
        if removed.is_some() {
            debug!(session_id, "Session removed");
        }
        removed
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SpeechSink for SessionRegistry {
    async fn speak(&self, session_id: &str, text: &str) -> Result<()> {
        let session = self
            .get(session_id)
            .await
            .ok_or_else(|| BridgeError::Session(format!("no such session: {session_id}")))?;
        session.speak(text)
    }
}
