//! Wire protocol types for the telephony media stream and the recognition service.
//!
//! The bridge parses only what it needs from the telephony messages — `track`,
//! `timestamp`, `payload` — and is otherwise protocol-agnostic about business
//! content.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{BridgeError, Result};

/// Which direction of call audio a media frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Inbound,
    Outbound,
}

/// The `media` object of a telephony media message.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    pub track: Track,

    /// Milliseconds since stream start. Some providers send this as a string.
    #[serde(deserialize_with = "de_timestamp_ms")]
    pub timestamp: u64,

    /// Base64-encoded audio in the call's wire encoding.
    pub payload: String,
}

impl MediaPayload {
    /// Decode the base64 audio payload.
    pub fn decode_audio(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.payload)
            .map_err(|e| BridgeError::Protocol(format!("invalid base64 payload: {e}")))
    }
}

fn de_timestamp_ms<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TsRepr {
        Num(u64),
        Str(String),
    }

    match TsRepr::deserialize(deserializer)? {
        TsRepr::Num(n) => Ok(n),
        TsRepr::Str(s) => s
            .parse::<u64>()
            .map_err(|e| serde::de::Error::custom(format!("bad timestamp {s:?}: {e}"))),
    }
}

/// An inbound telephony stream message, tagged by `event`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CallMessage {
    Connected,
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    Media {
        media: MediaPayload,
    },
    Stop,
}

/// Parse one telephony stream message. Malformed input is a protocol error —
/// the caller skips the frame and keeps going.
pub fn parse_call_message(raw: &str) -> Result<CallMessage> {
    serde_json::from_str(raw).map_err(|e| BridgeError::Protocol(format!("bad call message: {e}")))
}

/// Build an egress media message carrying one synthesized audio chunk.
pub fn media_message(stream_sid: &str, audio: &[u8]) -> String {
    serde_json::json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "payload": BASE64.encode(audio) },
    })
    .to_string()
}

/// A transcript event from the recognition service.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptEvent {
    pub is_final: bool,
    pub transcript: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Parse one recognition-service message.
pub fn parse_transcript_event(raw: &str) -> Result<TranscriptEvent> {
    serde_json::from_str(raw)
        .map_err(|e| BridgeError::Protocol(format!("bad transcript event: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_media_message() {
        let raw = r#"{
            "event": "media",
            "streamSid": "MZ123",
            "media": { "track": "inbound", "timestamp": "1260", "payload": "AAAA" }
        }"#;
        let msg = parse_call_message(raw).unwrap();
        match msg {
            CallMessage::Media { media } => {
                assert_eq!(media.track, Track::Inbound);
                assert_eq!(media.timestamp, 1260);
                assert_eq!(media.decode_audio().unwrap(), vec![0u8, 0, 0]);
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_numeric_timestamp() {
        let raw = r#"{"event":"media","media":{"track":"outbound","timestamp":40,"payload":""}}"#;
        let msg = parse_call_message(raw).unwrap();
        match msg {
            CallMessage::Media { media } => {
                assert_eq!(media.track, Track::Outbound);
                assert_eq!(media.timestamp, 40);
                assert!(media.decode_audio().unwrap().is_empty());
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_start_and_stop() {
        let start = parse_call_message(r#"{"event":"start","streamSid":"MZ9"}"#).unwrap();
        assert!(matches!(start, CallMessage::Start { ref stream_sid } if stream_sid == "MZ9"));

        let stop = parse_call_message(r#"{"event":"stop"}"#).unwrap();
        assert!(matches!(stop, CallMessage::Stop));
    }

    #[test]
    fn test_malformed_message_is_protocol_error() {
        let err = parse_call_message("not json").unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
        assert!(!err.is_fatal());

        // Missing track
        let err = parse_call_message(
            r#"{"event":"media","media":{"timestamp":0,"payload":"AAAA"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));

        // Unknown track value
        let err = parse_call_message(
            r#"{"event":"media","media":{"track":"sideways","timestamp":0,"payload":""}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[test]
    fn test_invalid_base64_payload() {
        let raw = r#"{"event":"media","media":{"track":"inbound","timestamp":0,"payload":"!!"}}"#;
        let msg = parse_call_message(raw).unwrap();
        match msg {
            CallMessage::Media { media } => {
                assert!(matches!(
                    media.decode_audio().unwrap_err(),
                    BridgeError::Protocol(_)
                ));
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_media_message_roundtrip() {
        let msg = media_message("MZ123", &[0xff, 0x7e, 0x00]);
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["event"], "media");
        assert_eq!(value["streamSid"], "MZ123");
        let payload = value["media"]["payload"].as_str().unwrap();
        assert_eq!(BASE64.decode(payload).unwrap(), vec![0xff, 0x7e, 0x00]);
    }

    #[test]
    fn test_parse_transcript_event() {
        let ev =
            parse_transcript_event(r#"{"is_final":true,"transcript":"hello","confidence":0.93}"#)
                .unwrap();
        assert!(ev.is_final);
        assert_eq!(ev.transcript, "hello");
        assert_eq!(ev.confidence, Some(0.93));

        let interim = parse_transcript_event(r#"{"is_final":false,"transcript":"hel"}"#).unwrap();
        assert!(!interim.is_final);
        assert!(interim.confidence.is_none());
    }
}
