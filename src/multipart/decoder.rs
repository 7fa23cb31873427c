use crate::error::MultipartError;
use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

/// Largest header block (or preamble) accepted before the stream is considered malformed
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Headers of one multipart part, names lowercased
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    entries: Vec<(String, String)>,
}

impl PartHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N: AsRef<str>, V: Into<String>>(&mut self, name: N, value: V) {
        self.entries
            .push((name.as_ref().trim().to_ascii_lowercase(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Declared payload size, unparsed
    pub fn content_length(&self) -> Option<&str> {
        self.get("content-length")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of [`MultipartDecoder::next_event`]
#[derive(Debug, Clone, PartialEq)]
pub enum PartEvent {
    /// A new part started
    Headers(PartHeaders),
    /// Body bytes of the current part. A part's body may be split across any
    /// number of events, and the last one can carry the line break that
    /// precedes the next delimiter.
    Data(Bytes),
    /// The current part's delimiter was reached
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Preamble,
    Headers,
    Body,
    AfterDelimiter,
    Epilogue,
}

/// Incremental decoder for `multipart/x-mixed-replace` preview bodies.
///
/// Bytes are pushed with [`feed`](Self::feed) as they arrive from the
/// transport and events are pulled with [`next_event`](Self::next_event)
/// until it yields `None`.
#[derive(Debug)]
pub struct MultipartDecoder {
    expected_boundary: Option<String>,
    delimiter: Option<Vec<u8>>,
    buffer: BytesMut,
    state: DecoderState,
    preamble_bytes: usize,
}

impl MultipartDecoder {
    /// Create a decoder. Without a declared boundary the first `--` line of
    /// the body is taken as the delimiter.
    pub fn new(boundary: Option<String>) -> Self {
        Self {
            expected_boundary: boundary,
            delimiter: None,
            buffer: BytesMut::new(),
            state: DecoderState::Preamble,
            preamble_bytes: 0,
        }
    }

    pub fn from_content_type(content_type: Option<&str>) -> Self {
        Self::new(content_type.and_then(boundary_from_content_type))
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Delimiter line in use, once the first one has been seen
    pub fn delimiter(&self) -> Option<&[u8]> {
        self.delimiter.as_deref()
    }

    pub fn next_event(&mut self) -> Result<Option<PartEvent>, MultipartError> {
        loop {
            match self.state {
                DecoderState::Preamble => {
                    let Some(pos) = find(&self.buffer, CRLF) else {
                        if self.preamble_bytes + self.buffer.len() > MAX_HEADER_BYTES {
                            return Err(MultipartError::MissingBoundary);
                        }
                        return Ok(None);
                    };
                    let line = self.buffer.split_to(pos + CRLF.len());
                    self.preamble_bytes += line.len();
                    self.accept_preamble_line(trim_line(&line[..pos]))?;
                    if self.state == DecoderState::Preamble
                        && self.preamble_bytes > MAX_HEADER_BYTES
                    {
                        return Err(MultipartError::MissingBoundary);
                    }
                }
                DecoderState::Headers => {
                    if self.buffer.starts_with(CRLF) {
                        self.buffer.advance(CRLF.len());
                        self.state = DecoderState::Body;
                        return Ok(Some(PartEvent::Headers(PartHeaders::new())));
                    }
                    let Some(pos) = find(&self.buffer, HEADER_END) else {
                        if self.buffer.len() > MAX_HEADER_BYTES {
                            return Err(MultipartError::HeaderTooLarge {
                                limit: MAX_HEADER_BYTES,
                            });
                        }
                        return Ok(None);
                    };
                    let block = self.buffer.split_to(pos + HEADER_END.len());
                    let headers = parse_headers(&block[..pos])?;
                    self.state = DecoderState::Body;
                    return Ok(Some(PartEvent::Headers(headers)));
                }
                DecoderState::Body => {
                    let delimiter = self.delimiter.as_deref().unwrap_or_default();
                    if let Some(pos) = find(&self.buffer, delimiter) {
                        if pos > 0 {
                            let data = self.buffer.split_to(pos).freeze();
                            return Ok(Some(PartEvent::Data(data)));
                        }
                        self.buffer.advance(delimiter.len());
                        self.state = DecoderState::AfterDelimiter;
                        return Ok(Some(PartEvent::End));
                    }
                    // Hold back enough bytes to recognise a delimiter split across reads
                    let keep = delimiter.len().saturating_sub(1);
                    if self.buffer.len() > keep {
                        let ready = self.buffer.len() - keep;
                        let data = self.buffer.split_to(ready).freeze();
                        return Ok(Some(PartEvent::Data(data)));
                    }
                    return Ok(None);
                }
                DecoderState::AfterDelimiter => {
                    if self.buffer.len() < 2 {
                        return Ok(None);
                    }
                    if self.buffer.starts_with(b"--") {
                        trace!("Closing multipart delimiter reached");
                        self.buffer.clear();
                        self.state = DecoderState::Epilogue;
                        continue;
                    }
                    let Some(pos) = find(&self.buffer, CRLF) else {
                        if self.buffer.len() > MAX_HEADER_BYTES {
                            return Err(MultipartError::HeaderTooLarge {
                                limit: MAX_HEADER_BYTES,
                            });
                        }
                        return Ok(None);
                    };
                    self.buffer.advance(pos + CRLF.len());
                    self.state = DecoderState::Headers;
                }
                DecoderState::Epilogue => {
                    self.buffer.clear();
                    return Ok(None);
                }
            }
        }
    }

    /// Hand out body bytes held back for delimiter matching. Only meaningful
    /// once the transport has reached end of stream.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.state == DecoderState::Body && !self.buffer.is_empty() {
            Some(self.buffer.split().freeze())
        } else {
            None
        }
    }

    /// Check that the stream ended on a part boundary
    pub fn finish(&self) -> Result<(), MultipartError> {
        match self.state {
            DecoderState::Preamble | DecoderState::Epilogue => Ok(()),
            // Cameras that never send the closing delimiter stop between parts
            DecoderState::AfterDelimiter | DecoderState::Headers if self.buffer.is_empty() => {
                Ok(())
            }
            _ => Err(MultipartError::Truncated),
        }
    }

    fn accept_preamble_line(&mut self, line: &[u8]) -> Result<(), MultipartError> {
        if line.is_empty() {
            return Ok(());
        }

        let matches_boundary = match &self.expected_boundary {
            // Some cameras write the bare boundary instead of `--boundary`
            Some(boundary) => {
                let boundary = boundary.as_bytes();
                line == boundary
                    || (line.len() == boundary.len() + 2
                        && line.starts_with(b"--")
                        && &line[2..] == boundary)
            }
            None => line.starts_with(b"--") && line.len() > 2,
        };

        if matches_boundary {
            trace!(
                "Multipart delimiter detected: {}",
                String::from_utf8_lossy(line)
            );
            self.delimiter = Some(line.to_vec());
            self.state = DecoderState::Headers;
            return Ok(());
        }

        if let Some(boundary) = &self.expected_boundary {
            let boundary = boundary.as_bytes();
            if line.ends_with(b"--") && line[..line.len() - 2].ends_with(boundary) {
                // Closing delimiter before any part: an empty body
                self.state = DecoderState::Epilogue;
                return Ok(());
            }
            // Preamble text is allowed when the boundary is known
            return Ok(());
        }

        Err(MultipartError::MissingBoundary)
    }
}

/// Extract the `boundary` parameter of a multipart content type
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media_type = params.next()?.trim();
    if !media_type.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }

    params.find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn parse_headers(block: &[u8]) -> Result<PartHeaders, MultipartError> {
    let mut headers = PartHeaders::new();
    for raw in block.split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(trim_line(raw));
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MultipartError::MalformedHeader {
                line: line.to_string(),
            })?;
        headers.insert(name, value.trim());
    }
    Ok(headers)
}

fn trim_line(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    &line[..end]
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
