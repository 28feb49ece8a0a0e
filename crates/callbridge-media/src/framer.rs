//! Inbound media framing — gap compensation and flush-sized buffering.
//!
//! Telephony media arrives as 20 ms frames with millisecond timestamps.
//! Dropped packets show up as timestamp gaps; the buffer pads them with
//! encoding silence so the recognition service sees continuous audio.

use tracing::{debug, warn};

use callbridge_core::config::AudioConfig;
use callbridge_core::protocol::Track;

/// Silence value for μ-law audio.
pub const SILENCE_BYTE: u8 = 0xff;

/// One decoded media frame from the telephony stream.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub track: Track,
    pub timestamp_ms: u64,
    pub payload: Vec<u8>,
}

/// Per-track byte buffer with timestamp tracking and silence padding.
#[derive(Debug)]
pub struct AudioBuffer {
    data: Vec<u8>,
    last_timestamp_ms: u64,
    started: bool,
    flush_threshold: usize,
    frame_interval_ms: u64,
    bytes_per_ms: u64,
}

impl AudioBuffer {
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            data: Vec::new(),
            last_timestamp_ms: 0,
            started: false,
            flush_threshold: audio.flush_threshold_bytes,
            frame_interval_ms: audio.frame_interval_ms,
            bytes_per_ms: audio.bytes_per_ms,
        }
    }

    /// Append one frame's payload, padding silence for any timestamp gap.
    pub fn push(&mut self, track: Track, timestamp_ms: u64, payload: &[u8]) {
        if self.started {
            let expected = self.last_timestamp_ms + self.frame_interval_ms;
            if timestamp_ms > expected {
                let gap_ms = timestamp_ms - expected;
                let fill = (gap_ms * self.bytes_per_ms) as usize;
                warn!(
                    ?track,
                    last = self.last_timestamp_ms,
                    current = timestamp_ms,
                    fill_bytes = fill,
                    "Timestamp gap, padding silence"
                );
                self.data.resize(self.data.len() + fill, SILENCE_BYTE);
            }
        } else {
            debug!(?track, timestamp_ms, "First frame for track");
            self.started = true;
        }
        self.last_timestamp_ms = timestamp_ms;
        self.data.extend_from_slice(payload);
    }

    /// Drain every full flush-threshold chunk, retaining the remainder.
    pub fn drain_full_chunks(&mut self) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        while self.data.len() >= self.flush_threshold {
            let rest = self.data.split_off(self.flush_threshold);
            chunks.push(std::mem::replace(&mut self.data, rest));
        }
        chunks
    }

    /// Flush whatever remains, even below threshold. Used at end-of-stream so
    /// trailing audio is never lost.
    pub fn flush_eos(&mut self) -> Option<Vec<u8>> {
        if self.data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Frames both tracks of one call, feeding the recognition relay from the
/// inbound track only. Outbound audio is tracked (timestamps and padding) but
/// its chunks are discarded; a stereo-mix extension would route them instead.
pub struct AudioFramer {
    inbound: AudioBuffer,
    outbound: AudioBuffer,
}

impl AudioFramer {
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            inbound: AudioBuffer::new(audio),
            outbound: AudioBuffer::new(audio),
        }
    }

    /// Process one frame. Returns the chunks now ready for the recognition
    /// relay. An empty payload is the end-of-stream marker and forces a flush
    /// of the inbound remainder.
    pub fn push_frame(&mut self, frame: &MediaFrame) -> Vec<Vec<u8>> {
        if frame.payload.is_empty() {
            debug!(track = ?frame.track, "Empty payload, flushing remainder");
            return self.flush_eos().into_iter().collect();
        }

        let buffer = match frame.track {
            Track::Inbound => &mut self.inbound,
            Track::Outbound => &mut self.outbound,
        };
        buffer.push(frame.track, frame.timestamp_ms, &frame.payload);

        match frame.track {
            Track::Inbound => self.inbound.drain_full_chunks(),
            Track::Outbound => {
                // Keep the buffer bounded; chunks are not forwarded.
                self.outbound.drain_full_chunks();
                Vec::new()
            }
        }
    }

    /// Flush any buffered inbound audio below the threshold.
    pub fn flush_eos(&mut self) -> Option<Vec<u8>> {
        self.outbound.flush_eos();
        self.inbound.flush_eos()
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }
}
