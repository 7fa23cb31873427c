mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::{encode_multipart, MockStream, MockTransport, RecordedRequest};

use crate::error::Result;
use crate::protocol::{Command, CommandResult, InfoResponse, StateResponse, StatusRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;

/// Raw body chunks as they arrive from the camera
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Streamed response body of a live preview command
pub struct PreviewBody {
    /// Response `Content-Type`, carrying the multipart boundary
    pub content_type: Option<String>,
    pub chunks: ByteStream,
}

impl fmt::Debug for PreviewBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewBody")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// What the camera answered to a streamed command
#[derive(Debug)]
pub enum StreamResponse {
    /// A multipart body to be consumed incrementally
    Stream(PreviewBody),
    /// The camera answered with a JSON envelope instead (usually an error)
    Envelope(CommandResult),
}

/// Request/response plumbing to one camera.
///
/// Implementations only move bytes and decode envelopes; execution state
/// handling lives in [`crate::executor::CommandExecutor`].
#[async_trait]
pub trait CameraTransport: Send + Sync {
    /// `POST commands/execute`
    async fn execute(&self, command: &Command) -> Result<CommandResult>;

    /// `POST commands/status`
    async fn status(&self, request: &StatusRequest) -> Result<CommandResult>;

    /// `POST state`
    async fn state(&self) -> Result<StateResponse>;

    /// `GET info`
    async fn info(&self) -> Result<InfoResponse>;

    /// `POST commands/execute` for commands answering with a streamed body
    async fn execute_stream(&self, command: &Command) -> Result<StreamResponse>;
}
