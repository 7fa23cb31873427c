use super::{CameraTransport, PreviewBody, StreamResponse};
use crate::error::{OscError, Result};
use crate::protocol::{
    CameraState, Command, CommandResult, InfoResponse, StateResponse, StatusRequest,
};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::debug;

/// A request observed by [`MockTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedRequest {
    Execute(Command),
    Status(String),
    State,
    Info,
    Stream(Command),
}

/// Scripted answer to a streamed command
#[derive(Debug)]
pub enum MockStream {
    Multipart {
        content_type: Option<String>,
        chunks: Vec<Result<Bytes>>,
    },
    Envelope(CommandResult),
}

/// Camera stand-in answering from per-endpoint scripts, for running the
/// protocol state machines without hardware.
///
/// Each endpoint pops its next scripted answer. An exhausted script answers
/// [`OscError::Cancelled`], so loops that run until cancellation end cleanly
/// once the script has been played.
#[derive(Default)]
pub struct MockTransport {
    executes: Mutex<VecDeque<Result<CommandResult>>>,
    statuses: Mutex<VecDeque<Result<CommandResult>>>,
    states: Mutex<VecDeque<Result<StateResponse>>>,
    streams: Mutex<VecDeque<Result<MockStream>>>,
    info: Mutex<Option<InfoResponse>>,
    requests: Mutex<Vec<(Instant, RecordedRequest)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_execute(&self, result: CommandResult) -> &Self {
        self.executes.lock().push_back(Ok(result));
        self
    }

    pub fn push_execute_error(&self, error: OscError) -> &Self {
        self.executes.lock().push_back(Err(error));
        self
    }

    pub fn push_status(&self, result: CommandResult) -> &Self {
        self.statuses.lock().push_back(Ok(result));
        self
    }

    pub fn push_status_error(&self, error: OscError) -> &Self {
        self.statuses.lock().push_back(Err(error));
        self
    }

    /// Script a state response with the given latest file
    pub fn push_state(&self, latest_file_uri: Option<&str>) -> &Self {
        let mut states = self.states.lock();
        let fingerprint = format!("FIG_{:04}", states.len());
        states.push_back(Ok(StateResponse {
            fingerprint,
            state: CameraState {
                latest_file_uri: latest_file_uri.map(str::to_string),
                ..CameraState::default()
            },
        }));
        drop(states);
        self
    }

    pub fn push_state_error(&self, error: OscError) -> &Self {
        self.states.lock().push_back(Err(error));
        self
    }

    pub fn push_stream(&self, content_type: Option<&str>, chunks: Vec<Bytes>) -> &Self {
        self.streams.lock().push_back(Ok(MockStream::Multipart {
            content_type: content_type.map(str::to_string),
            chunks: chunks.into_iter().map(Ok).collect(),
        }));
        self
    }

    pub fn push_stream_script(&self, stream: MockStream) -> &Self {
        self.streams.lock().push_back(Ok(stream));
        self
    }

    pub fn push_stream_error(&self, error: OscError) -> &Self {
        self.streams.lock().push_back(Err(error));
        self
    }

    pub fn set_info(&self, info: InfoResponse) -> &Self {
        *self.info.lock() = Some(info);
        self
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    /// Arrival times of the status requests received so far
    pub fn status_times(&self) -> Vec<Instant> {
        self.requests
            .lock()
            .iter()
            .filter(|(_, r)| matches!(r, RecordedRequest::Status(_)))
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn count(&self, matcher: impl Fn(&RecordedRequest) -> bool) -> usize {
        self.requests.lock().iter().filter(|(_, r)| matcher(r)).count()
    }

    fn record(&self, request: RecordedRequest) {
        self.requests.lock().push((Instant::now(), request));
    }
}

fn next_scripted<T>(queue: &Mutex<VecDeque<Result<T>>>, endpoint: &str) -> Result<T> {
    queue.lock().pop_front().unwrap_or_else(|| {
        debug!("Mock {} script exhausted", endpoint);
        Err(OscError::Cancelled)
    })
}

#[async_trait]
impl CameraTransport for MockTransport {
    async fn execute(&self, command: &Command) -> Result<CommandResult> {
        self.record(RecordedRequest::Execute(command.clone()));
        next_scripted(&self.executes, "execute")
    }

    async fn status(&self, request: &StatusRequest) -> Result<CommandResult> {
        self.record(RecordedRequest::Status(request.id.clone()));
        next_scripted(&self.statuses, "status")
    }

    async fn state(&self) -> Result<StateResponse> {
        self.record(RecordedRequest::State);
        next_scripted(&self.states, "state")
    }

    async fn info(&self) -> Result<InfoResponse> {
        self.record(RecordedRequest::Info);
        self.info
            .lock()
            .clone()
            .ok_or_else(|| OscError::system("Mock info not scripted"))
    }

    async fn execute_stream(&self, command: &Command) -> Result<StreamResponse> {
        self.record(RecordedRequest::Stream(command.clone()));
        match next_scripted(&self.streams, "stream")? {
            MockStream::Multipart {
                content_type,
                chunks,
            } => Ok(StreamResponse::Stream(PreviewBody {
                content_type,
                chunks: Box::pin(futures::stream::iter(chunks)),
            })),
            MockStream::Envelope(result) => Ok(StreamResponse::Envelope(result)),
        }
    }
}

/// Encode frames the way cameras serve their preview: one part per frame,
/// each declaring its `Content-Length`, closed by the final delimiter.
pub fn encode_multipart(boundary: &str, frames: &[&[u8]]) -> Bytes {
    let mut body = BytesMut::new();
    for frame in frames {
        body.put_slice(
            format!(
                "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                boundary,
                frame.len()
            )
            .as_bytes(),
        );
        body.put_slice(frame);
        body.put_slice(b"\r\n");
    }
    body.put_slice(format!("--{}--\r\n", boundary).as_bytes());
    body.freeze()
}
