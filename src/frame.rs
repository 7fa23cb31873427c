use bytes::Bytes;
use std::time::SystemTime;

/// One complete live preview image, reassembled from a multipart part
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position of the frame within its preview stream, starting at 0
    pub sequence: u64,
    /// Time the last byte of the frame arrived
    pub timestamp: SystemTime,
    /// Frame payload; its length always equals the part's declared content-length
    pub data: Bytes,
}

impl Frame {
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self {
            sequence,
            timestamp: SystemTime::now(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check for the JPEG start and end markers
    pub fn looks_like_jpeg(&self) -> bool {
        self.data.len() >= 4
            && self.data[..2] == [0xFF, 0xD8]
            && self.data[self.data.len() - 2..] == [0xFF, 0xD9]
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
