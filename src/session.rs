use crate::config::{OscConfig, PreviewConfig};
use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::poller::StatusPoller;
use crate::preview::LivePreviewOrchestrator;
use crate::protocol::{
    commands, Command, FileUriResults, SessionParameters, SessionResults, SetOptionsParameters,
};
use serde_json::{json, Map};
use std::future::Future;
use std::ops::Deref;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Server-side session scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub timeout_seconds: u32,
}

/// Session-scoped operations. Cheap to clone; carries the session id by
/// value but cannot close the session.
#[derive(Clone)]
pub struct SessionHandle {
    executor: CommandExecutor,
    poller: StatusPoller,
    session: Session,
}

impl SessionHandle {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn id(&self) -> &str {
        &self.session.session_id
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Announce the client API version the camera should speak
    pub async fn set_client_version(
        &self,
        version: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut options = Map::new();
        options.insert("clientVersion".to_string(), json!(version));
        let command = Command::new(commands::SET_OPTIONS).with_parameters(SetOptionsParameters {
            session_id: self.session.session_id.clone(),
            options,
        })?;

        let initial = self.executor.execute(&command, cancel).await?;
        self.poller
            .poll_until_terminal(initial, |_| {}, cancel)
            .await?;
        debug!("Client version set to {}", version);
        Ok(())
    }

    /// Take a still picture and return the URI of the written file
    pub async fn take_picture<P>(
        &self,
        on_progress: P,
        cancel: &CancellationToken,
    ) -> Result<String>
    where
        P: FnMut(f32),
    {
        let command = Command::new(commands::TAKE_PICTURE).with_parameters(self.parameters())?;
        let initial = self.executor.execute(&command, cancel).await?;
        let finished = self
            .poller
            .poll_until_terminal(initial, on_progress, cancel)
            .await?;

        let results: FileUriResults = finished.results_as()?;
        info!("Picture taken: {}", results.file_uri);
        Ok(results.file_uri)
    }

    /// Live preview bound to this session
    pub fn live_preview(&self, config: &PreviewConfig) -> LivePreviewOrchestrator {
        LivePreviewOrchestrator::new(self.executor.clone(), self.id(), config.clone())
    }

    fn parameters(&self) -> SessionParameters {
        SessionParameters {
            session_id: self.session.session_id.clone(),
        }
    }
}

/// An open camera session. Closing consumes it, so it is closed at most once.
pub struct CameraSession {
    handle: SessionHandle,
    closed: bool,
}

impl CameraSession {
    /// Start a session and, when configured, announce the client version
    pub async fn open(
        executor: CommandExecutor,
        config: &OscConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let poller = StatusPoller::new(executor.clone(), &config.polling);
        let initial = executor
            .execute(&Command::new(commands::START_SESSION), cancel)
            .await?;
        let started = poller.poll_until_terminal(initial, |_| {}, cancel).await?;
        let results: SessionResults = started.results_as()?;

        info!(
            "Session {} opened (timeout {}s)",
            results.session_id, results.timeout
        );
        let session = Self {
            handle: SessionHandle {
                executor,
                poller,
                session: Session {
                    session_id: results.session_id,
                    timeout_seconds: results.timeout,
                },
            },
            closed: false,
        };

        if let Some(version) = config.session.client_version {
            if let Err(e) = session.set_client_version(version, cancel).await {
                session.close().await;
                return Err(e);
            }
        }

        Ok(session)
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Close the session. Failures are logged and swallowed.
    pub async fn close(mut self) {
        self.closed = true;
        let session_id = self.handle.session.session_id.clone();

        // The caller's token may already be cancelled; cleanup still runs
        let cancel = CancellationToken::new();
        let command = match Command::new(commands::CLOSE_SESSION)
            .with_parameters(self.handle.parameters())
        {
            Ok(command) => command,
            Err(e) => {
                warn!("Failed to build close request for session {}: {}", session_id, e);
                return;
            }
        };

        let outcome = match self.handle.executor.execute(&command, &cancel).await {
            Ok(initial) => self
                .handle
                .poller
                .poll_until_terminal(initial, |_| {}, &cancel)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => info!("Session {} closed", session_id),
            Err(e) => warn!("Failed to close session {}: {}", session_id, e),
        }
    }
}

impl Deref for CameraSession {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "Session {} dropped without being closed",
                self.handle.session.session_id
            );
        }
    }
}

/// Open a session, run `f` with a handle to it, then close it.
///
/// The session is closed whether or not `f` succeeds, and a failed close
/// never replaces `f`'s result.
pub async fn with_session<T, F, Fut>(
    executor: CommandExecutor,
    config: &OscConfig,
    cancel: &CancellationToken,
    f: F,
) -> Result<T>
where
    F: FnOnce(SessionHandle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = CameraSession::open(executor, config, cancel).await?;
    let result = f(session.handle()).await;
    session.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OscError;
    use crate::protocol::{CommandError, CommandProgress, CommandResult, ExecutionState};
    use crate::transport::{CameraTransport, MockTransport, RecordedRequest};
    use std::sync::Arc;

    fn envelope(name: &str, state: ExecutionState) -> CommandResult {
        CommandResult {
            name: name.to_string(),
            id: None,
            state,
            progress: None,
            error: None,
            results: serde_json::Value::Null,
        }
    }

    fn session_started() -> CommandResult {
        CommandResult {
            results: json!({"sessionId": "SID_0001", "timeout": 180}),
            ..envelope(commands::START_SESSION, ExecutionState::Done)
        }
    }

    fn failure(name: &str, code: &str) -> CommandResult {
        CommandResult {
            error: Some(CommandError {
                code: code.to_string(),
                message: "Request failed".to_string(),
            }),
            ..envelope(name, ExecutionState::Error)
        }
    }

    fn executor_with(mock: &Arc<MockTransport>) -> CommandExecutor {
        CommandExecutor::new(Arc::clone(mock) as Arc<dyn CameraTransport>)
    }

    fn executed_names(mock: &MockTransport) -> Vec<String> {
        mock.requests()
            .into_iter()
            .filter_map(|request| match request {
                RecordedRequest::Execute(command) => Some(command.name),
                _ => None,
            })
            .collect()
    }

    fn close_count(mock: &MockTransport) -> usize {
        mock.count(|r| {
            matches!(r, RecordedRequest::Execute(c) if c.name == commands::CLOSE_SESSION)
        })
    }

    #[tokio::test]
    async fn test_open_reads_session_results() {
        let mock = Arc::new(MockTransport::new());
        mock.push_execute(session_started())
            .push_execute(envelope(commands::CLOSE_SESSION, ExecutionState::Done));

        let session = CameraSession::open(
            executor_with(&mock),
            &OscConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            session.session(),
            &Session {
                session_id: "SID_0001".to_string(),
                timeout_seconds: 180,
            }
        );
        session.close().await;
        assert_eq!(close_count(&mock), 1);
    }

    #[tokio::test]
    async fn test_open_error_is_typed() {
        let mock = Arc::new(MockTransport::new());
        mock.push_execute(failure(commands::START_SESSION, "disabledCommand"));

        let err = CameraSession::open(
            executor_with(&mock),
            &OscConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .err()
        .unwrap();

        assert_eq!(err.code(), Some("disabledCommand"));
        assert_eq!(close_count(&mock), 0);
    }

    #[tokio::test]
    async fn test_open_with_zero_poll_interval_fails_cleanly() {
        let mock = Arc::new(MockTransport::new());
        let mut pending = envelope(commands::START_SESSION, ExecutionState::InProgress);
        pending.id = Some("1".to_string());
        mock.push_execute(pending);
        let mut config = OscConfig::default();
        config.polling.interval_ms = 0;

        let err = CameraSession::open(executor_with(&mock), &config, &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, OscError::System { .. }));
        assert_eq!(mock.count(|r| matches!(r, RecordedRequest::Status(_))), 0);
    }

    #[tokio::test]
    async fn test_open_announces_client_version() {
        let mock = Arc::new(MockTransport::new());
        mock.push_execute(session_started())
            .push_execute(envelope(commands::SET_OPTIONS, ExecutionState::Done))
            .push_execute(envelope(commands::CLOSE_SESSION, ExecutionState::Done));
        let mut config = OscConfig::default();
        config.session.client_version = Some(2);

        let session = CameraSession::open(executor_with(&mock), &config, &CancellationToken::new())
            .await
            .unwrap();
        session.close().await;

        let requests = mock.requests();
        let RecordedRequest::Execute(set_options) = &requests[1] else {
            panic!("Expected setOptions, got {:?}", requests[1]);
        };
        assert_eq!(
            set_options.parameters,
            Some(json!({"sessionId": "SID_0001", "options": {"clientVersion": 2}}))
        );
        assert_eq!(
            executed_names(&mock),
            vec![
                commands::START_SESSION,
                commands::SET_OPTIONS,
                commands::CLOSE_SESSION
            ]
        );
    }

    #[tokio::test]
    async fn test_rejected_client_version_closes_session() {
        let mock = Arc::new(MockTransport::new());
        mock.push_execute(session_started())
            .push_execute(failure(commands::SET_OPTIONS, "invalidParameterValue"))
            .push_execute(envelope(commands::CLOSE_SESSION, ExecutionState::Done));
        let mut config = OscConfig::default();
        config.session.client_version = Some(9);

        let err = CameraSession::open(executor_with(&mock), &config, &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert_eq!(err.code(), Some("invalidParameterValue"));
        assert_eq!(close_count(&mock), 1);
    }

    #[tokio::test]
    async fn test_close_failure_is_swallowed() {
        let mock = Arc::new(MockTransport::new());
        mock.push_execute(session_started())
            .push_execute_error(OscError::Http {
                status: 500,
                body: "oops".to_string(),
            });

        let session = CameraSession::open(
            executor_with(&mock),
            &OscConfig::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        session.close().await;

        assert_eq!(close_count(&mock), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_picture_polls_to_file_uri() {
        let mock = Arc::new(MockTransport::new());
        mock.push_execute(session_started())
            .push_execute(CommandResult {
                id: Some("7".to_string()),
                progress: Some(CommandProgress { completion: 0.0 }),
                ..envelope(commands::TAKE_PICTURE, ExecutionState::InProgress)
            })
            .push_execute(envelope(commands::CLOSE_SESSION, ExecutionState::Done));
        mock.push_status(CommandResult {
            id: Some("7".to_string()),
            progress: Some(CommandProgress { completion: 0.5 }),
            ..envelope(commands::TAKE_PICTURE, ExecutionState::InProgress)
        })
        .push_status(CommandResult {
            id: Some("7".to_string()),
            results: json!({"fileUri": "100RICOH/R0010001.JPG"}),
            ..envelope(commands::TAKE_PICTURE, ExecutionState::Done)
        });

        let cancel = CancellationToken::new();
        let mut progress = Vec::new();
        let recorder = &mut progress;
        let file_uri = with_session(executor_with(&mock), &OscConfig::default(), &cancel, |handle| {
            let cancel = cancel.clone();
            async move {
                handle
                    .take_picture(|completion| recorder.push(completion), &cancel)
                    .await
            }
        })
        .await
        .unwrap();

        assert_eq!(file_uri, "100RICOH/R0010001.JPG");
        assert_eq!(progress, vec![0.0, 0.5]);
        assert_eq!(mock.status_times().len(), 2);
        assert_eq!(close_count(&mock), 1);
    }

    #[tokio::test]
    async fn test_close_failure_does_not_mask_result() {
        let mock = Arc::new(MockTransport::new());
        mock.push_execute(session_started())
            .push_execute(failure(commands::TAKE_PICTURE, "unexpected"))
            .push_execute(failure(commands::CLOSE_SESSION, "missingParameter"));

        let cancel = CancellationToken::new();
        let err = with_session(executor_with(&mock), &OscConfig::default(), &cancel, |handle| {
            let cancel = cancel.clone();
            async move { handle.take_picture(|_| {}, &cancel).await }
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), Some("unexpected"));
        assert_eq!(close_count(&mock), 1);
    }

    #[tokio::test]
    async fn test_session_closes_after_cancellation() {
        let mock = Arc::new(MockTransport::new());
        mock.push_execute(session_started())
            .push_execute(envelope(commands::CLOSE_SESSION, ExecutionState::Done));

        let cancel = CancellationToken::new();
        let err = with_session(executor_with(&mock), &OscConfig::default(), &cancel, |_handle| {
            let cancel = cancel.clone();
            async move {
                cancel.cancel();
                Err::<(), _>(OscError::Cancelled)
            }
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(close_count(&mock), 1);
    }
}
