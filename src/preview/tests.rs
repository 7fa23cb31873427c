use super::*;
use crate::config::OscConfig;
use crate::error::{OscError, SERVICE_UNAVAILABLE};
use crate::executor::CommandExecutor;
use crate::protocol::{CommandError, CommandResult, ExecutionState};
use crate::transport::{
    encode_multipart, CameraTransport, MockStream, MockTransport, RecordedRequest,
};
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=B";

fn orchestrator_with(mock: &Arc<MockTransport>) -> LivePreviewOrchestrator {
    let executor = CommandExecutor::new(Arc::clone(mock) as Arc<dyn CameraTransport>);
    LivePreviewOrchestrator::new(executor, "SID_0001", OscConfig::default().preview)
}

fn push_frames(mock: &MockTransport, frames: &[&[u8]]) {
    mock.push_stream(Some(CONTENT_TYPE), vec![encode_multipart("B", frames)]);
}

fn push_empty_stream(mock: &MockTransport) {
    mock.push_stream(Some(CONTENT_TYPE), vec![Bytes::from_static(b"--B--\r\n")]);
}

/// A body whose first part completes and whose second part is cut short
fn push_truncated_stream(mock: &MockTransport, complete: &[u8]) {
    let mut body = encode_multipart("B", &[complete]).to_vec();
    body.truncate(body.len() - b"--B--\r\n".len());
    body.extend_from_slice(b"--B\r\nContent-Length: 50\r\n\r\npart");
    mock.push_stream(Some(CONTENT_TYPE), vec![Bytes::from(body)]);
}

fn busy_envelope() -> CommandResult {
    CommandResult {
        name: "camera.getLivePreview".to_string(),
        id: None,
        state: ExecutionState::Error,
        progress: None,
        error: Some(CommandError {
            code: SERVICE_UNAVAILABLE.to_string(),
            message: "Capturing".to_string(),
        }),
        results: serde_json::Value::Null,
    }
}

fn descriptions(events: &[PreviewEvent]) -> Vec<String> {
    events.iter().map(PreviewEvent::description).collect()
}

// Tracker transitions

#[test]
fn test_trigger_mode_ignores_files_before_first_frame() {
    let mut tracker = CaptureTracker::new(PreviewMode::Trigger, Some("a.jpg".to_string()));
    assert_eq!(tracker.phase(), PreviewPhase::AwaitingFirstFrame);

    assert_eq!(
        tracker.observe_state(Some("a.jpg")),
        StateObservation::Progress(AWAITING_FIRST_FRAME_PROGRESS)
    );
    assert_eq!(tracker.observe_state(Some("b.jpg")), StateObservation::Idle);
    assert_eq!(tracker.last_file_uri(), Some("b.jpg"));

    tracker.frame_received();
    assert_eq!(tracker.phase(), PreviewPhase::Streaming);
    assert_eq!(tracker.observe_state(Some("b.jpg")), StateObservation::Idle);
    assert_eq!(
        tracker.observe_state(Some("c.jpg")),
        StateObservation::Captured("c.jpg".to_string())
    );
}

#[test]
fn test_glitch_degrades_only_after_first_frame() {
    let mut tracker = CaptureTracker::new(PreviewMode::Trigger, None);
    tracker.decode_glitch();
    assert_eq!(tracker.phase(), PreviewPhase::AwaitingFirstFrame);
    assert_eq!(
        tracker.observe_state(None),
        StateObservation::Progress(AWAITING_FIRST_FRAME_PROGRESS)
    );

    tracker.frame_received();
    tracker.decode_glitch();
    assert_eq!(tracker.phase(), PreviewPhase::Degraded);
    assert_eq!(
        tracker.observe_state(None),
        StateObservation::Progress(DEGRADED_PROGRESS)
    );
    // Still degraded until something clears it
    assert_eq!(
        tracker.observe_state(None),
        StateObservation::Progress(DEGRADED_PROGRESS)
    );
}

#[test]
fn test_degraded_cleared_by_frame_or_capture() {
    let mut tracker = CaptureTracker::new(PreviewMode::Resume, None);
    tracker.decode_glitch();
    tracker.frame_received();
    assert_eq!(tracker.phase(), PreviewPhase::Streaming);

    tracker.decode_glitch();
    assert_eq!(
        tracker.observe_state(Some("d.jpg")),
        StateObservation::Captured("d.jpg".to_string())
    );
    assert_eq!(tracker.phase(), PreviewPhase::Streaming);
}

#[test]
fn test_resume_mode_reports_every_change() {
    let mut tracker = CaptureTracker::new(PreviewMode::Resume, Some("a.jpg".to_string()));
    assert_eq!(tracker.observe_state(Some("a.jpg")), StateObservation::Idle);
    assert_eq!(
        tracker.observe_state(Some("b.jpg")),
        StateObservation::Captured("b.jpg".to_string())
    );
    // A cleared file is not a capture
    assert_eq!(tracker.observe_state(None), StateObservation::Idle);
    assert_eq!(tracker.last_file_uri(), None);
}

// Orchestrator loop

#[tokio::test]
async fn test_trigger_reports_capture_only_after_frames() {
    let mock = Arc::new(MockTransport::new());
    mock.push_state(Some("a.jpg")) // before the loop
        .push_state(Some("a.jpg"))
        .push_state(Some("b.jpg"))
        .push_state(Some("b.jpg"))
        .push_state(Some("c.jpg"));
    push_empty_stream(&mock);
    push_empty_stream(&mock);
    push_frames(&mock, &[b"one"]);
    push_frames(&mock, &[b"two!"]);

    let orchestrator = orchestrator_with(&mock);
    let mut events: Vec<PreviewEvent> = Vec::new();
    orchestrator
        .run(PreviewMode::Trigger, &mut events, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        descriptions(&events),
        vec![
            "Capture progress -1.0",
            "Capture progress -1.0",
            "Preview frame 0 (3 bytes)",
            "Captured c.jpg",
            "Preview frame 0 (4 bytes)",
        ]
    );
    assert!(!events.contains(&PreviewEvent::Captured {
        file_uri: "b.jpg".to_string()
    }));
}

#[tokio::test]
async fn test_resume_image_progress_reports_without_frames() {
    let mock = Arc::new(MockTransport::new());
    mock.push_state(Some("a.jpg")).push_state(Some("b.jpg"));
    push_empty_stream(&mock);

    let executor = CommandExecutor::new(Arc::clone(&mock) as Arc<dyn CameraTransport>);
    let mut config = OscConfig::default().preview;
    config.resume_image_progress = true;
    let orchestrator = LivePreviewOrchestrator::new(executor, "SID_0001", config);
    assert_eq!(orchestrator.default_mode(), PreviewMode::Resume);

    let mut events: Vec<PreviewEvent> = Vec::new();
    orchestrator
        .run(orchestrator.default_mode(), &mut events, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(descriptions(&events), vec!["Captured b.jpg"]);
}

#[tokio::test]
async fn test_service_unavailable_is_retried_other_codes_abort() {
    let mock = Arc::new(MockTransport::new());
    for _ in 0..4 {
        mock.push_state(Some("a.jpg"));
    }
    mock.push_stream_error(OscError::protocol(SERVICE_UNAVAILABLE, "Busy"));
    mock.push_stream_script(MockStream::Envelope(busy_envelope()));
    mock.push_stream_error(OscError::protocol("invalidParameterValue", "Bad session"));

    let orchestrator = orchestrator_with(&mock);
    let mut events: Vec<PreviewEvent> = Vec::new();
    let err = orchestrator
        .run(PreviewMode::Resume, &mut events, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        OscError::Protocol { code, message } => {
            assert_eq!(code, "invalidParameterValue");
            assert_eq!(message, "Bad session");
        }
        other => panic!("Expected protocol error, got {:?}", other),
    }
    assert_eq!(mock.count(|r| matches!(r, RecordedRequest::Stream(_))), 3);
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_decode_glitch_reports_degraded_progress() {
    let mock = Arc::new(MockTransport::new());
    for _ in 0..4 {
        mock.push_state(Some("a.jpg"));
    }
    push_truncated_stream(&mock, b"one");
    push_frames(&mock, &[b"two"]);

    let orchestrator = orchestrator_with(&mock);
    let mut events: Vec<PreviewEvent> = Vec::new();
    orchestrator
        .run(PreviewMode::Resume, &mut events, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        descriptions(&events),
        vec![
            "Preview frame 0 (3 bytes)",
            "Capture progress 0.0",
            "Preview frame 0 (3 bytes)",
        ]
    );
}

#[tokio::test]
async fn test_state_failure_propagates() {
    let mock = Arc::new(MockTransport::new());
    mock.push_state(Some("a.jpg"))
        .push_state_error(OscError::Http {
            status: 500,
            body: String::new(),
        });

    let orchestrator = orchestrator_with(&mock);
    let err = orchestrator
        .run(PreviewMode::Trigger, &mut Vec::<PreviewEvent>::new(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OscError::Http { status: 500, .. }));
}

#[tokio::test]
async fn test_wait_for_capture_returns_first_new_file() {
    let mock = Arc::new(MockTransport::new());
    mock.push_state(Some("a.jpg"))
        .push_state(Some("a.jpg"))
        .push_state(Some("b.jpg"));
    push_empty_stream(&mock);

    let orchestrator = orchestrator_with(&mock);
    let mut events: Vec<PreviewEvent> = Vec::new();
    let file_uri = orchestrator
        .wait_for_capture(&mut events, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(file_uri, "b.jpg");
    assert!(events.is_empty());
    assert_eq!(mock.count(|r| *r == RecordedRequest::State), 3);
    assert_eq!(mock.count(|r| matches!(r, RecordedRequest::Stream(_))), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let mock = Arc::new(MockTransport::new());
    let orchestrator = orchestrator_with(&mock);
    let cancel = CancellationToken::new();
    cancel.cancel();

    orchestrator
        .run(PreviewMode::Trigger, &mut Vec::<PreviewEvent>::new(), &cancel)
        .await
        .unwrap();
    let err = orchestrator
        .wait_for_capture(&mut Vec::<PreviewEvent>::new(), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_no_events_after_cancellation() {
    let mock = Arc::new(MockTransport::new());
    for _ in 0..3 {
        mock.push_state(Some("a.jpg"));
    }
    push_frames(&mock, &[b"one", b"two", b"three"]);
    push_frames(&mock, &[b"four"]);

    let orchestrator = orchestrator_with(&mock);
    let cancel = CancellationToken::new();
    let mut events: Vec<PreviewEvent> = Vec::new();
    let mut sink = FnSink(|event: PreviewEvent| {
        events.push(event);
        cancel.cancel();
    });
    orchestrator
        .run(PreviewMode::Trigger, &mut sink, &cancel)
        .await
        .unwrap();
    drop(sink);

    // The first poll reports -1.0, which already cancels the loop before any frame
    assert_eq!(descriptions(&events), vec!["Capture progress -1.0"]);
    assert_eq!(mock.count(|r| *r == RecordedRequest::State), 2);
    assert_eq!(mock.count(|r| matches!(r, RecordedRequest::Stream(_))), 0);
}

#[tokio::test]
async fn test_cancellation_between_frames() {
    let mock = Arc::new(MockTransport::new());
    for _ in 0..3 {
        mock.push_state(Some("a.jpg"));
    }
    push_frames(&mock, &[b"one", b"two", b"three"]);

    let orchestrator = orchestrator_with(&mock);
    let cancel = CancellationToken::new();
    let mut frames = Vec::new();
    let mut sink = FnSink(|event: PreviewEvent| {
        if let PreviewEvent::Frame(frame) = event {
            frames.push(frame);
            cancel.cancel();
        }
    });
    orchestrator
        .run(PreviewMode::Resume, &mut sink, &cancel)
        .await
        .unwrap();
    drop(sink);

    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0].data[..], b"one");
    assert_eq!(mock.count(|r| *r == RecordedRequest::State), 2);
}

#[tokio::test]
async fn test_stream_once_sends_session_bound_command() {
    let mock = Arc::new(MockTransport::new());
    push_frames(&mock, &[b"one", b"two"]);

    let orchestrator = orchestrator_with(&mock);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PreviewEvent>();
    let mut sink = tx;
    let summary = orchestrator
        .stream_once(&mut sink, &CancellationToken::new())
        .await
        .unwrap();
    drop(sink);

    assert_eq!(summary.frames_emitted, 2);
    assert_eq!(summary.frames_dropped, 0);

    let mut received = Vec::new();
    while let Some(event) = rx.recv().await {
        received.push(event);
    }
    assert_eq!(
        descriptions(&received),
        vec!["Preview frame 0 (3 bytes)", "Preview frame 1 (3 bytes)"]
    );

    let requests = mock.requests();
    let RecordedRequest::Stream(command) = &requests[0] else {
        panic!("Expected a streamed command");
    };
    assert_eq!(command.name, "camera.getLivePreview");
    assert_eq!(command.parameters, Some(json!({"sessionId": "SID_0001"})));
}
