pub mod config;
pub mod error;
pub mod executor;
pub mod frame;
pub mod multipart;
pub mod poller;
pub mod preview;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::OscConfig;
pub use error::{MultipartError, OscError, Result};
pub use executor::CommandExecutor;
pub use frame::Frame;
pub use multipart::{reassemble_frames, FrameReassembler, MultipartDecoder, StreamSummary};
pub use poller::StatusPoller;
pub use preview::{
    CaptureTracker, FnSink, LivePreviewOrchestrator, PreviewEvent, PreviewMode, PreviewPhase,
    PreviewSink,
};
pub use protocol::{Command, CommandResult, ExecutionState, InfoResponse, StateResponse};
pub use session::{with_session, CameraSession, Session, SessionHandle};
pub use transport::{CameraTransport, HttpTransport, MockTransport, PreviewBody, StreamResponse};
