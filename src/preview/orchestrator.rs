use super::sink::{PreviewEvent, PreviewSink};
use super::tracker::{CaptureTracker, PreviewMode, StateObservation};
use crate::config::PreviewConfig;
use crate::error::{OscError, Result};
use crate::executor::CommandExecutor;
use crate::multipart::{reassemble_frames, StreamSummary};
use crate::protocol::{Command, SessionParameters};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs the live preview of one session and watches the camera state for
/// newly captured stills.
///
/// Each iteration polls the state endpoint, reports what changed, then
/// consumes one preview stream, forwarding its frames. Decode glitches and
/// `serviceUnavailable` answers never end the loop; any other failure does.
#[derive(Clone)]
pub struct LivePreviewOrchestrator {
    executor: CommandExecutor,
    session_id: String,
    config: PreviewConfig,
}

impl LivePreviewOrchestrator {
    pub fn new<S: Into<String>>(
        executor: CommandExecutor,
        session_id: S,
        config: PreviewConfig,
    ) -> Self {
        Self {
            executor,
            session_id: session_id.into(),
            config,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Mode `run` uses when the caller doesn't pick one
    pub fn default_mode(&self) -> PreviewMode {
        if self.config.resume_image_progress {
            PreviewMode::Resume
        } else {
            PreviewMode::Trigger
        }
    }

    /// Forward preview frames and capture notifications until cancelled.
    ///
    /// Cancellation ends the loop with `Ok(())`.
    pub async fn run<S: PreviewSink>(
        &self,
        mode: PreviewMode,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!("Live preview started in {:?} mode", mode);
        match self.drive(mode, false, sink, cancel).await {
            Ok(_) => Ok(()),
            Err(OscError::Cancelled) => {
                info!("Live preview cancelled");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Forward preview frames until a new still appears, then return its URI
    pub async fn wait_for_capture<S: PreviewSink>(
        &self,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<String> {
        match self.drive(PreviewMode::Resume, true, sink, cancel).await? {
            Some(file_uri) => Ok(file_uri),
            None => Err(OscError::Cancelled),
        }
    }

    /// Issue a single preview request and forward its frames
    pub async fn stream_once<S: PreviewSink>(
        &self,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<StreamSummary> {
        self.stream(sink, cancel, || {}).await
    }

    async fn drive<S: PreviewSink>(
        &self,
        mode: PreviewMode,
        stop_on_capture: bool,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let initial = self.executor.state(cancel).await?;
        let mut tracker = CaptureTracker::new(mode, initial.latest_file_uri().map(str::to_string));
        debug!("Watching for files after {:?}", tracker.last_file_uri());

        loop {
            if cancel.is_cancelled() {
                return Err(OscError::Cancelled);
            }

            match self.iterate(&mut tracker, stop_on_capture, sink, cancel).await {
                Ok(Some(file_uri)) => return Ok(Some(file_uri)),
                Ok(None) => {}
                Err(e) if e.is_service_unavailable() => {
                    debug!("Camera busy, retrying live preview: {}", e);
                }
                Err(OscError::Multipart(e)) => {
                    warn!("Live preview decode glitch: {}", e);
                    tracker.decode_glitch();
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn iterate<S: PreviewSink>(
        &self,
        tracker: &mut CaptureTracker,
        stop_on_capture: bool,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let state = self.executor.state(cancel).await?;
        if cancel.is_cancelled() {
            return Err(OscError::Cancelled);
        }

        match tracker.observe_state(state.latest_file_uri()) {
            StateObservation::Captured(file_uri) => {
                info!("New capture: {}", file_uri);
                if stop_on_capture {
                    return Ok(Some(file_uri));
                }
                sink.deliver(PreviewEvent::Captured { file_uri });
            }
            StateObservation::Progress(completion) => {
                sink.deliver(PreviewEvent::Progress(completion));
            }
            StateObservation::Idle => {}
        }

        self.stream(sink, cancel, || tracker.frame_received()).await?;
        if cancel.is_cancelled() {
            return Err(OscError::Cancelled);
        }
        Ok(None)
    }

    async fn stream<S, F>(
        &self,
        sink: &mut S,
        cancel: &CancellationToken,
        mut on_frame: F,
    ) -> Result<StreamSummary>
    where
        S: PreviewSink,
        F: FnMut(),
    {
        let command = self.preview_command()?;
        let max_frame_bytes = self.config.max_frame_bytes;

        let summary = self
            .executor
            .execute_streaming(&command, cancel, move |body| {
                reassemble_frames(body, max_frame_bytes, cancel, move |frame| {
                    on_frame();
                    sink.deliver(PreviewEvent::Frame(frame));
                })
            })
            .await?;

        Ok(summary.unwrap_or_default())
    }

    fn preview_command(&self) -> Result<Command> {
        Command::new(self.config.command.as_str()).with_parameters(SessionParameters {
            session_id: self.session_id.clone(),
        })
    }
}
