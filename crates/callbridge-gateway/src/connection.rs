//! Media-stream connection lifecycle — one WebSocket, one call.
//!
//! The read loop owns the call: it waits for the `start` message, wires up
//! the per-session pipeline (writer, recognition relay, aggregator, speak
//! worker), feeds media frames through the framer, and tears everything down
//! when the stream stops or the socket drops.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use callbridge_core::protocol::{CallMessage, parse_call_message};
use callbridge_media::aggregator::UtteranceAggregator;
use callbridge_media::dispatcher::dispatch_utterance_audio;
use callbridge_media::framer::{AudioFramer, MediaFrame};
use callbridge_media::relay::spawn_relay;
use callbridge_media::synth::{spawn_segment_synthesis, split_segments};

use crate::metrics::{
    record_call_connect, record_call_disconnect, record_error, record_reply, record_utterance,
};
use crate::session::CallSession;
use crate::state::GatewayState;

/// Handle a new media-stream WebSocket connection.
pub async fn handle_call_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "New media-stream connection");

    let (ws_tx, mut ws_rx) = ws.split();

    // Nothing to bridge until the provider announces the stream.
    let Some(stream_sid) = await_start(&mut ws_rx).await else {
        debug!(conn_id = %conn_id, "Connection ended before stream start");
        return;
    };

    let session = match start_session(&state, &stream_sid, ws_tx).await {
        Ok(session) => session,
        Err(e) => {
            warn!(stream_sid, %e, "Failed to start session");
            record_error("session_start");
            return;
        }
    };

    info!(stream_sid, conn_id = %conn_id, "Call session started");
    record_call_connect();

    run_call(&state, &session, &mut ws_rx).await;

    // First closer wins; the rest of teardown is idempotent behind it.
    session.begin_close();
    session.shutdown().await;
    state.registry.remove(&stream_sid).await;
    record_call_disconnect();
    info!(stream_sid, "Call session closed");
}

/// Read until the `start` message arrives, returning the stream id.
async fn await_start(ws_rx: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(Ok(message)) = ws_rx.next().await {
        let Message::Text(raw) = message else {
            continue;
        };
        match parse_call_message(&raw) {
            Ok(CallMessage::Connected) => debug!("Provider connected"),
            Ok(CallMessage::Start { stream_sid }) => return Some(stream_sid),
            Ok(CallMessage::Stop) => return None,
            Ok(CallMessage::Media { .. }) => {
                warn!("Media before stream start, skipping");
            }
            Err(e) => {
                warn!(%e, "Skipping malformed message");
                record_error("protocol");
            }
        }
    }
    None
}

/// Create the session and spawn its pipeline tasks.
async fn start_session(
    state: &Arc<GatewayState>,
    stream_sid: &str,
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
) -> callbridge_core::Result<Arc<CallSession>> {
    let (egress_tx, mut egress_rx) = mpsc::unbounded_channel::<String>();
    let (speak_tx, mut speak_rx) = mpsc::unbounded_channel::<String>();
    let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(state.config.outbox_capacity());
    let (transcript_tx, mut transcript_rx) = mpsc::unbounded_channel();

    let session = Arc::new(CallSession::new(stream_sid, egress_tx, speak_tx, audio_tx));
    state.registry.create(session.clone()).await?;

    // Writer: sole owner of the socket's send half. Everything that wants to
    // write egress frames goes through the session's unbounded queue.
    let writer_cancel = session.cancel.clone();
    let writer_sid = session.session_id.clone();
    session
        .add_task(tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    frame = egress_rx.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                    debug!(stream_sid = %writer_sid, %e, "Socket write failed");
                    writer_cancel.cancel();
                    break;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
        }))
        .await;

    // Recognition relay: lazy, connects on the first flushed chunk.
    session
        .add_task(spawn_relay(
            state.recognition.clone(),
            audio_rx,
            transcript_tx,
            session.cancel.clone(),
        ))
        .await;

    // Aggregator: transcript events in, filler + engine dispatch out.
    let aggregator = UtteranceAggregator::new(
        stream_sid,
        state.fillers.clone(),
        state.registry.clone(),
        state.engine.clone(),
    );
    let aggregator_cancel = session.cancel.clone();
    session
        .add_task(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = aggregator_cancel.cancelled() => break,
                    event = transcript_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                match aggregator.on_event(&event).await {
                    Ok(Some(_)) => record_utterance(),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(%e, "Utterance dispatch failed");
                        record_error("engine");
                    }
                }
            }
        }))
        .await;

    // Speak worker: synthesizes each queued text concurrently per segment,
    // but handles texts one at a time so replies play in queue order.
    let speak_sid = session.session_id.clone();
    let speak_cancel = session.cancel.clone();
    let synthesis = state.synthesis.clone();
    let speak_egress = session.egress_sender();
    session
        .add_task(tokio::spawn(async move {
            loop {
                let text = tokio::select! {
                    _ = speak_cancel.cancelled() => break,
                    text = speak_rx.recv() => match text {
                        Some(text) => text,
                        None => break,
                    },
                };
                let segments = split_segments(&text);
                if segments.is_empty() {
                    continue;
                }
                record_reply(segments.len());
                let expected = segments.len();
                let outcomes = spawn_segment_synthesis(synthesis.clone(), segments);
                if let Err(e) =
                    dispatch_utterance_audio(&speak_sid, expected, outcomes, &speak_egress).await
                {
                    warn!(stream_sid = %speak_sid, %e, "Playback dispatch failed");
                    record_error("synthesis");
                }
            }
        }))
        .await;

    session.mark_active();
    Ok(session)
}

/// The media loop: frames in, flushed chunks out to the relay.
async fn run_call(
    state: &Arc<GatewayState>,
    session: &Arc<CallSession>,
    ws_rx: &mut SplitStream<WebSocket>,
) {
    let mut framer = AudioFramer::new(&state.audio);

    loop {
        let message = tokio::select! {
            _ = session.cancel.cancelled() => break,
            message = ws_rx.next() => match message {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    debug!(stream_sid = %session.session_id, %e, "Socket read failed");
                    break;
                }
                None => break,
            },
        };

        let raw = match message {
            Message::Text(raw) => raw,
            Message::Close(_) => break,
            _ => continue,
        };

        match parse_call_message(&raw) {
            Ok(CallMessage::Media { media }) => {
                let audio = match media.decode_audio() {
                    Ok(audio) => audio,
                    Err(e) => {
                        warn!(%e, "Skipping frame with bad payload");
                        record_error("protocol");
                        continue;
                    }
                };
                let frame = MediaFrame {
                    track: media.track,
                    timestamp_ms: media.timestamp,
                    payload: audio,
                };
                let mut closed = false;
                for chunk in framer.push_frame(&frame) {
                    if session.forward_audio(chunk).await.is_err() {
                        closed = true;
                        break;
                    }
                }
                if closed {
                    break;
                }
            }
            Ok(CallMessage::Stop) => {
                info!(stream_sid = %session.session_id, "Stream stopped");
                break;
            }
            Ok(CallMessage::Connected) | Ok(CallMessage::Start { .. }) => {
                debug!("Ignoring duplicate handshake message");
            }
            Err(e) => {
                warn!(%e, "Skipping malformed message");
                record_error("protocol");
            }
        }
    }

    // Hand any buffered remainder to recognition before the relay closes.
    if let Some(chunk) = framer.flush_eos() {
        let _ = session.forward_audio(chunk).await;
    }
}
