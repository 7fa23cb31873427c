mod orchestrator;
mod sink;
mod tracker;
#[cfg(test)]
mod tests;

pub use orchestrator::LivePreviewOrchestrator;
pub use sink::{FnSink, PreviewEvent, PreviewSink};
pub use tracker::{
    CaptureTracker, PreviewMode, PreviewPhase, StateObservation, AWAITING_FIRST_FRAME_PROGRESS,
    DEGRADED_PROGRESS,
};
