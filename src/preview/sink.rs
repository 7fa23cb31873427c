use crate::frame::Frame;
use tokio::sync::mpsc;
use tracing::trace;

/// Something the live preview loop tells its caller
#[derive(Debug, Clone, PartialEq)]
pub enum PreviewEvent {
    /// A complete preview frame
    Frame(Frame),
    /// Still capturing; `-1.0` before the first frame, `0.0` after a decode glitch
    Progress(f32),
    /// A new still picture was written
    Captured { file_uri: String },
}

impl PreviewEvent {
    pub fn description(&self) -> String {
        match self {
            PreviewEvent::Frame(frame) => {
                format!("Preview frame {} ({} bytes)", frame.sequence, frame.len())
            }
            PreviewEvent::Progress(completion) => format!("Capture progress {:.1}", completion),
            PreviewEvent::Captured { file_uri } => format!("Captured {}", file_uri),
        }
    }
}

/// Receives preview events in order, at most once each
pub trait PreviewSink {
    fn deliver(&mut self, event: PreviewEvent);
}

impl PreviewSink for mpsc::UnboundedSender<PreviewEvent> {
    fn deliver(&mut self, event: PreviewEvent) {
        if self.send(event).is_err() {
            trace!("Preview receiver dropped, discarding event");
        }
    }
}

impl PreviewSink for Vec<PreviewEvent> {
    fn deliver(&mut self, event: PreviewEvent) {
        self.push(event);
    }
}

/// Adapts a closure into a [`PreviewSink`]
pub struct FnSink<F>(pub F);

impl<F: FnMut(PreviewEvent)> PreviewSink for FnSink<F> {
    fn deliver(&mut self, event: PreviewEvent) {
        (self.0)(event)
    }
}
