//! Outbound dispatch — releases synthesized chunks in sequence order.
//!
//! Segment synthesis completes in any order; the telephony socket must see
//! chunks in non-decreasing sequence order. The reorderer buffers early
//! arrivals and waits for the missing index rather than emitting out of order.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::mpsc;
use tracing::debug;

use callbridge_core::protocol::media_message;
use callbridge_core::Result;

use crate::synth::SegmentOutcome;

/// Restores sequence order over out-of-order segment outcomes.
#[derive(Debug, Default)]
pub struct ChunkReorderer {
    next: usize,
    pending: BTreeMap<usize, Vec<u8>>,
    skipped: BTreeSet<usize>,
}

impl ChunkReorderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one outcome; returns every chunk now releasable, in order.
    /// A skipped index releases the chunks queued behind it.
    pub fn accept(&mut self, outcome: SegmentOutcome) -> Vec<Vec<u8>> {
        match outcome {
            SegmentOutcome::Synthesized(chunk) => {
                self.pending.insert(chunk.sequence_index, chunk.audio);
            }
            SegmentOutcome::Skipped { sequence_index } => {
                self.skipped.insert(sequence_index);
            }
        }

        let mut released = Vec::new();
        loop {
            if let Some(audio) = self.pending.remove(&self.next) {
                released.push(audio);
                self.next += 1;
            } else if self.skipped.remove(&self.next) {
                self.next += 1;
            } else {
                break;
            }
        }
        released
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Drain the outcomes of one utterance and forward its chunks, in sequence
/// order, as framed egress messages. Returns once all `expected` segments
/// have been accounted for or the session's writer has gone away.
pub async fn dispatch_utterance_audio(
    stream_sid: &str,
    expected: usize,
    mut outcomes: mpsc::UnboundedReceiver<SegmentOutcome>,
    egress_tx: &mpsc::UnboundedSender<String>,
) -> Result<()> {
    let mut reorderer = ChunkReorderer::new();
    let mut seen = 0;

    while seen < expected {
        let Some(outcome) = outcomes.recv().await else {
            break;
        };
        seen += 1;

        for audio in reorderer.accept(outcome) {
            let message = media_message(stream_sid, &audio);
            if egress_tx.send(message).is_err() {
                // Writer task is gone: the session closed under us. Remaining
                // chunks are discarded, never written to a closed socket.
                debug!(stream_sid, "Egress closed mid-utterance, discarding chunks");
                return Ok(());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SynthesizedChunk;

    fn synthesized(index: usize, byte: u8) -> SegmentOutcome {
        SegmentOutcome::Synthesized(SynthesizedChunk {
            sequence_index: index,
            audio: vec![byte; 4],
        })
    }

    #[test]
    fn test_in_order_release() {
        let mut reorderer = ChunkReorderer::new();
        assert_eq!(reorderer.accept(synthesized(0, 0xaa)).len(), 1);
        assert_eq!(reorderer.accept(synthesized(1, 0xbb)).len(), 1);
        assert_eq!(reorderer.accept(synthesized(2, 0xcc)).len(), 1);
    }

    #[test]
    fn test_out_of_order_waits_for_gap() {
        let mut reorderer = ChunkReorderer::new();
        // Segment 1 finishes before segment 0: held back.
        assert!(reorderer.accept(synthesized(1, 0xbb)).is_empty());
        assert_eq!(reorderer.pending_len(), 1);

        // Segment 0 arrives: both release, in order.
        let released = reorderer.accept(synthesized(0, 0xaa));
        assert_eq!(released.len(), 2);
        assert_eq!(released[0], vec![0xaa; 4]);
        assert_eq!(released[1], vec![0xbb; 4]);
        assert_eq!(reorderer.pending_len(), 0);
    }

    #[test]
    fn test_skip_unblocks_later_segments() {
        let mut reorderer = ChunkReorderer::new();
        assert!(reorderer.accept(synthesized(1, 0xbb)).is_empty());
        assert!(reorderer.accept(synthesized(2, 0xcc)).is_empty());

        // Segment 0 failed to synthesize: its skip releases 1 and 2.
        let released = reorderer.accept(SegmentOutcome::Skipped { sequence_index: 0 });
        assert_eq!(released.len(), 2);
        assert_eq!(released[0], vec![0xbb; 4]);
        assert_eq!(released[1], vec![0xcc; 4]);
    }

    #[tokio::test]
    async fn test_dispatch_emits_segment_order_despite_slow_segment() {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (egress_tx, mut egress_rx) = mpsc::unbounded_channel();

        // Segment 2 (index 1) synthesizes slower than segment 3 (index 2);
        // segment 1 (index 0) lands last of all.
        outcome_tx.send(synthesized(2, 0xcc)).unwrap();
        outcome_tx.send(synthesized(1, 0xbb)).unwrap();
        outcome_tx.send(synthesized(0, 0xaa)).unwrap();
        drop(outcome_tx);

        dispatch_utterance_audio("MZ123", 3, outcome_rx, &egress_tx)
            .await
            .unwrap();
        drop(egress_tx);

        let mut payloads = Vec::new();
        while let Some(message) = egress_rx.recv().await {
            let value: serde_json::Value = serde_json::from_str(&message).unwrap();
            assert_eq!(value["event"], "media");
            assert_eq!(value["streamSid"], "MZ123");
            payloads.push(value["media"]["payload"].as_str().unwrap().to_string());
        }

        use base64::Engine as _;
        let decoded: Vec<Vec<u8>> = payloads
            .iter()
            .map(|p| base64::engine::general_purpose::STANDARD.decode(p).unwrap())
            .collect();
        assert_eq!(decoded, vec![vec![0xaa; 4], vec![0xbb; 4], vec![0xcc; 4]]);
    }

    #[tokio::test]
    async fn test_dispatch_stops_when_egress_closed() {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (egress_tx, egress_rx) = mpsc::unbounded_channel();
        drop(egress_rx);

        outcome_tx.send(synthesized(0, 0xaa)).unwrap();
        outcome_tx.send(synthesized(1, 0xbb)).unwrap();
        drop(outcome_tx);

        // Must return cleanly, not error, when the writer is gone.
        dispatch_utterance_audio("MZ123", 2, outcome_rx, &egress_tx)
            .await
            .unwrap();
    }
}
