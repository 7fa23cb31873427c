use super::decoder::PartHeaders;
use crate::frame::Frame;
use bytes::BytesMut;
use tracing::{debug, trace, warn};

/// Counters kept by a [`FrameReassembler`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Complete frames handed out
    pub frames_emitted: u64,
    /// Parts that ended corrupted or short of their declared length
    pub frames_dropped: u64,
    /// Body bytes received, including discarded ones
    pub bytes_received: u64,
    /// Bytes beyond a part's declared length or belonging to a dropped part
    pub bytes_discarded: u64,
}

/// Accumulation state of the part currently in flight
#[derive(Debug)]
struct PartAssembly {
    expected_len: usize,
    buffer: BytesMut,
    corrupted: bool,
    finished: bool,
}

impl PartAssembly {
    fn new(expected_len: usize) -> Self {
        Self {
            expected_len,
            buffer: BytesMut::with_capacity(expected_len),
            corrupted: false,
            finished: false,
        }
    }

    fn corrupted() -> Self {
        Self {
            expected_len: 0,
            buffer: BytesMut::new(),
            corrupted: true,
            finished: false,
        }
    }
}

/// Rebuilds complete frames from multipart body chunks using each part's
/// declared `content-length`.
///
/// At most one part is in flight. Chunks past the declared length are
/// discarded, and a part whose length cannot be determined is swallowed
/// without affecting the parts after it.
#[derive(Debug)]
pub struct FrameReassembler {
    max_frame_bytes: usize,
    current: Option<PartAssembly>,
    next_sequence: u64,
    stats: ReassemblyStats,
}

impl FrameReassembler {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            current: None,
            next_sequence: 0,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Whether the part in flight has already produced its frame
    pub fn part_complete(&self) -> bool {
        self.current.as_ref().is_some_and(|part| part.finished)
    }

    /// Start accumulating a new part
    pub fn begin_part(&mut self, headers: &PartHeaders) {
        self.abandon_current("superseded by a new part");

        let assembly = match self.declared_length(headers) {
            Some(len) => {
                trace!("Part started, expecting {} bytes", len);
                PartAssembly::new(len)
            }
            None => PartAssembly::corrupted(),
        };
        self.current = Some(assembly);
    }

    /// Append body bytes to the current part, returning the frame once the
    /// declared length is reached
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Option<Frame> {
        self.stats.bytes_received += chunk.len() as u64;

        let Some(part) = self.current.as_mut() else {
            trace!("Discarding {} bytes outside of any part", chunk.len());
            self.stats.bytes_discarded += chunk.len() as u64;
            return None;
        };

        if part.corrupted || part.finished {
            self.stats.bytes_discarded += chunk.len() as u64;
            return None;
        }

        let remaining = part.expected_len - part.buffer.len();
        let take = remaining.min(chunk.len());
        part.buffer.extend_from_slice(&chunk[..take]);
        if take < chunk.len() {
            trace!(
                "Discarding {} trailing bytes past declared length",
                chunk.len() - take
            );
            self.stats.bytes_discarded += (chunk.len() - take) as u64;
        }

        if part.buffer.len() < part.expected_len {
            return None;
        }

        part.finished = true;
        let data = part.buffer.split().freeze();
        let frame = Frame::new(self.next_sequence, data);
        self.next_sequence += 1;
        self.stats.frames_emitted += 1;
        Some(frame)
    }

    /// The current part's delimiter was reached
    pub fn end_part(&mut self) {
        self.abandon_current("ended before its declared length");
    }

    fn abandon_current(&mut self, reason: &str) {
        let Some(part) = self.current.take() else {
            return;
        };
        if part.finished {
            return;
        }

        self.stats.frames_dropped += 1;
        self.stats.bytes_discarded += part.buffer.len() as u64;
        if part.corrupted {
            debug!("Dropped corrupted preview part");
        } else {
            debug!(
                "Dropped preview part {} ({} of {} bytes)",
                reason,
                part.buffer.len(),
                part.expected_len
            );
        }
    }

    fn declared_length(&self, headers: &PartHeaders) -> Option<usize> {
        let Some(raw) = headers.content_length() else {
            warn!("Preview part without content-length, dropping it");
            return None;
        };

        match raw.trim().parse::<usize>() {
            Ok(0) => {
                warn!("Preview part declares an empty payload, dropping it");
                None
            }
            Ok(len) if len > self.max_frame_bytes => {
                warn!(
                    "Preview part declares {} bytes, above the {} byte limit",
                    len, self.max_frame_bytes
                );
                None
            }
            Ok(len) => Some(len),
            Err(e) => {
                warn!("Unparsable preview content-length '{}': {}", raw, e);
                None
            }
        }
    }
}
