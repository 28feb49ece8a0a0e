//! Per-call session state and lifecycle.
//!
//! A session moves `Connecting → Active → Closing → Closed`, forward only.
//! The `Closing` transition happens at most once; everything it releases
//! (recognition connection, tasks, socket writes) is idempotent behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use callbridge_core::{BridgeError, Result};

/// How long owned tasks get to drain after cancellation before being aborted.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Bridging state for one active phone call.
pub struct CallSession {
    pub session_id: String,
    pub cancel: CancellationToken,
    state: Mutex<SessionState>,
    closed: AtomicBool,
    egress_tx: mpsc::UnboundedSender<String>,
    speak_tx: mpsc::UnboundedSender<String>,
    audio_tx: mpsc::Sender<Vec<u8>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl CallSession {
    pub fn new(
        session_id: impl Into<String>,
        egress_tx: mpsc::UnboundedSender<String>,
        speak_tx: mpsc::UnboundedSender<String>,
        audio_tx: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState::Connecting),
            closed: AtomicBool::new(false),
            egress_tx,
            speak_tx,
            audio_tx,
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn mark_active(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == SessionState::Connecting {
            *state = SessionState::Active;
        }
    }

    /// Begin teardown. Returns true for the first caller only; later calls
    /// are no-ops, making close idempotent across stop signals, socket
    /// closure, and fatal pipeline errors arriving together.
    pub fn begin_close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.state.lock().unwrap() = SessionState::Closing;
        self.cancel.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Hand a flushed audio chunk to the recognition relay. Suspends when the
    /// bounded outbox is full — backpressure, never dropping.
    pub async fn forward_audio(&self, chunk: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::Session("session is closing".into()));
        }
        self.audio_tx
            .send(chunk)
            .await
            .map_err(|_| BridgeError::Session("recognition relay is gone".into()))
    }

    /// Queue text for synthesis and playback on this call.
    pub fn speak(&self, text: &str) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::Session("session is closing".into()));
        }
        self.speak_tx
            .send(text.to_string())
            .map_err(|_| BridgeError::Session("speak worker is gone".into()))
    }

    pub fn egress_sender(&self) -> mpsc::UnboundedSender<String> {
        self.egress_tx.clone()
    }

    pub async fn add_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.push(handle);
    }

    /// Drain or abort every owned task, then mark the session `Closed`.
    /// Task panics are contained here: logged, never propagated.
    pub async fn shutdown(&self) {
        debug_assert!(self.is_closed(), "shutdown without begin_close");

        let mut tasks = self.tasks.lock().await;
        for mut handle in tasks.drain(..) {
            match tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await {
                Ok(Err(e)) if e.is_panic() => {
                    warn!(session_id = %self.session_id, %e, "Session task panicked");
                }
                Ok(_) => {}
                Err(_) => {
                    debug!(session_id = %self.session_id, "Aborting task after drain timeout");
                    handle.abort();
                }
            }
        }

        *self.state.lock().unwrap() = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_session() -> (CallSession, mpsc::UnboundedReceiver<String>, mpsc::Receiver<Vec<u8>>) {
        let (egress_tx, _egress_rx) = mpsc::unbounded_channel();
        let (speak_tx, speak_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::channel(2);
        (
            CallSession::new("MZ123", egress_tx, speak_tx, audio_tx),
            speak_rx,
            audio_rx,
        )
    }

    #[test]
    fn test_state_progression() {
        let (session, _speak_rx, _audio_rx) = make_session();
        assert_eq!(session.state(), SessionState::Connecting);

        session.mark_active();
        assert_eq!(session.state(), SessionState::Active);

        assert!(session.begin_close());
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (session, _speak_rx, _audio_rx) = make_session();
        assert!(session.begin_close());
        assert!(!session.begin_close());
        assert!(!session.begin_close());
        assert!(session.cancel.is_cancelled());
    }

    #[test]
    fn test_mark_active_after_close_is_ignored() {
        let (session, _speak_rx, _audio_rx) = make_session();
        session.begin_close();
        session.mark_active();
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[tokio::test]
    async fn test_no_forwarding_after_close() {
        let (session, mut speak_rx, mut audio_rx) = make_session();
        session.begin_close();

        assert!(session.forward_audio(vec![0xff; 160]).await.is_err());
        assert!(session.speak("hello").is_err());

        assert!(audio_rx.try_recv().is_err());
        assert!(speak_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forward_audio_backpressure() {
        let (session, _speak_rx, mut audio_rx) = make_session();
        session.mark_active();

        // Capacity 2: the third send suspends until the consumer drains one.
        session.forward_audio(vec![1]).await.unwrap();
        session.forward_audio(vec![2]).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            session.forward_audio(vec![3]),
        )
        .await;
        assert!(blocked.is_err(), "send should suspend on a full outbox");

        // Drain one; the next send goes through. FIFO order is preserved.
        assert_eq!(audio_rx.recv().await.unwrap(), vec![1]);
        session.forward_audio(vec![3]).await.unwrap();
        assert_eq!(audio_rx.recv().await.unwrap(), vec![2]);
        assert_eq!(audio_rx.recv().await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_shutdown_contains_task_panic() {
        let (session, _speak_rx, _audio_rx) = make_session();
        session
            .add_task(tokio::spawn(async { panic!("task blew up") }))
            .await;
        session.begin_close();
        // Must not propagate the panic.
        session.shutdown().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stuck_task() {
        tokio::time::pause();
        let (session, _speak_rx, _audio_rx) = make_session();
        session
            .add_task(tokio::spawn(async {
                std::future::pending::<()>().await;
            }))
            .await;
        session.begin_close();
        session.shutdown().await;
        assert_eq!(session.state(), SessionState::Closed);
    }
}
