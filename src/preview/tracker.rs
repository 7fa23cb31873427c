use tracing::debug;

/// Progress reported while no preview frame has been observed yet
pub const AWAITING_FIRST_FRAME_PROGRESS: f32 = -1.0;
/// Progress reported after the previous preview stream hit a decode glitch
pub const DEGRADED_PROGRESS: f32 = 0.0;

/// Whether every file change is reported, or only those seen after the
/// preview has delivered frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewMode {
    /// File changes are only trusted once a preview frame was observed
    Trigger,
    /// Every file change is reported
    Resume,
}

/// Where the preview loop stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewPhase {
    /// No frame seen yet in trigger mode; file changes are stale
    AwaitingFirstFrame,
    /// Frames are flowing (or resume mode, which never gates)
    Streaming,
    /// The last preview stream ended with a decode glitch
    Degraded,
}

/// What a state poll means for the caller
#[derive(Debug, Clone, PartialEq)]
pub enum StateObservation {
    /// A new file was written
    Captured(String),
    /// Nothing captured yet; report this completion value
    Progress(f32),
    /// Nothing to report
    Idle,
}

/// Correlates state polls with preview activity to tell when a still picture
/// has actually been captured
#[derive(Debug, Clone)]
pub struct CaptureTracker {
    phase: PreviewPhase,
    last_file_uri: Option<String>,
}

impl CaptureTracker {
    pub fn new(mode: PreviewMode, initial_file_uri: Option<String>) -> Self {
        let phase = match mode {
            PreviewMode::Trigger => PreviewPhase::AwaitingFirstFrame,
            PreviewMode::Resume => PreviewPhase::Streaming,
        };
        Self {
            phase,
            last_file_uri: initial_file_uri,
        }
    }

    pub fn phase(&self) -> PreviewPhase {
        self.phase
    }

    pub fn last_file_uri(&self) -> Option<&str> {
        self.last_file_uri.as_deref()
    }

    /// Feed the camera's latest file from a state poll
    pub fn observe_state(&mut self, latest_file_uri: Option<&str>) -> StateObservation {
        if latest_file_uri == self.last_file_uri.as_deref() {
            return match self.phase {
                PreviewPhase::AwaitingFirstFrame => {
                    StateObservation::Progress(AWAITING_FIRST_FRAME_PROGRESS)
                }
                PreviewPhase::Degraded => StateObservation::Progress(DEGRADED_PROGRESS),
                PreviewPhase::Streaming => StateObservation::Idle,
            };
        }

        self.last_file_uri = latest_file_uri.map(str::to_string);
        let Some(file_uri) = latest_file_uri else {
            debug!("Latest file cleared");
            return StateObservation::Idle;
        };

        match self.phase {
            PreviewPhase::AwaitingFirstFrame => {
                debug!("Ignoring {} written before any preview frame", file_uri);
                StateObservation::Idle
            }
            PreviewPhase::Degraded => {
                self.transition(PreviewPhase::Streaming);
                StateObservation::Captured(file_uri.to_string())
            }
            PreviewPhase::Streaming => StateObservation::Captured(file_uri.to_string()),
        }
    }

    /// A complete preview frame was delivered
    pub fn frame_received(&mut self) {
        if self.phase != PreviewPhase::Streaming {
            self.transition(PreviewPhase::Streaming);
        }
    }

    /// The preview stream hit a decode glitch
    pub fn decode_glitch(&mut self) {
        // Before the first frame there is nothing to degrade from
        if self.phase == PreviewPhase::Streaming {
            self.transition(PreviewPhase::Degraded);
        }
    }

    fn transition(&mut self, next: PreviewPhase) {
        debug!("Preview phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }
}
