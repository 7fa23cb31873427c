use crate::error::{OscError, Result};
use crate::protocol::{Command, CommandResult, InfoResponse, StateResponse, StatusRequest};
use crate::transport::{CameraTransport, PreviewBody, StreamResponse};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Sends single commands to the camera.
///
/// Every call honours the cancellation token before the request is issued
/// and while the response is awaited. Nothing is retried here; polling for
/// slow commands is the [`crate::poller::StatusPoller`]'s job.
#[derive(Clone)]
pub struct CommandExecutor {
    transport: Arc<dyn CameraTransport>,
}

impl CommandExecutor {
    pub fn new(transport: Arc<dyn CameraTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn CameraTransport> {
        &self.transport
    }

    /// Submit a command and return the camera's immediate answer, whatever
    /// its execution state
    pub async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> Result<CommandResult> {
        debug!("Executing {}", command.name);
        let result = guarded(cancel, self.transport.execute(command)).await?;
        trace!(
            command = %command.name,
            id = ?result.id,
            state = %result.state,
            "Command answered"
        );
        Ok(result)
    }

    /// Query the current status of a previously submitted command
    pub async fn status(&self, id: &str, cancel: &CancellationToken) -> Result<CommandResult> {
        let request = StatusRequest { id: id.to_string() };
        let result = guarded(cancel, self.transport.status(&request)).await?;
        trace!(id = %id, state = %result.state, "Status answered");
        Ok(result)
    }

    pub async fn state(&self, cancel: &CancellationToken) -> Result<StateResponse> {
        guarded(cancel, self.transport.state()).await
    }

    pub async fn info(&self, cancel: &CancellationToken) -> Result<InfoResponse> {
        guarded(cancel, self.transport.info()).await
    }

    /// Submit a command whose answer is a streamed body and hand that body
    /// to `consumer`, completing when the consumer completes.
    ///
    /// A JSON envelope in the `error` state becomes a protocol error. Any
    /// other envelope means the camera produced no stream and yields `None`.
    pub async fn execute_streaming<T, F, Fut>(
        &self,
        command: &Command,
        cancel: &CancellationToken,
        consumer: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce(PreviewBody) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        debug!("Executing streamed {}", command.name);
        match guarded(cancel, self.transport.execute_stream(command)).await? {
            StreamResponse::Stream(body) => consumer(body).await.map(Some),
            StreamResponse::Envelope(result) => {
                let result = result.into_outcome()?;
                debug!(
                    "{} answered with a {} envelope instead of a stream",
                    command.name, result.state
                );
                Ok(None)
            }
        }
    }
}

/// Race a transport call against cancellation
async fn guarded<T, F>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(OscError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OscError::Cancelled),
        result = call => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CommandError, ExecutionState};
    use crate::transport::{encode_multipart, MockStream, MockTransport, RecordedRequest};
    use futures::StreamExt;
    use serde_json::json;

    /// Camera that accepts requests and never answers
    struct StalledTransport;

    #[async_trait::async_trait]
    impl CameraTransport for StalledTransport {
        async fn execute(&self, _command: &Command) -> Result<CommandResult> {
            futures::future::pending().await
        }

        async fn status(&self, _request: &StatusRequest) -> Result<CommandResult> {
            futures::future::pending().await
        }

        async fn state(&self) -> Result<StateResponse> {
            futures::future::pending().await
        }

        async fn info(&self) -> Result<InfoResponse> {
            futures::future::pending().await
        }

        async fn execute_stream(&self, _command: &Command) -> Result<StreamResponse> {
            futures::future::pending().await
        }
    }

    fn executor_with(mock: &Arc<MockTransport>) -> CommandExecutor {
        CommandExecutor::new(Arc::clone(mock) as Arc<dyn CameraTransport>)
    }

    fn error_result(code: &str) -> CommandResult {
        CommandResult {
            name: "camera.getLivePreview".to_string(),
            id: None,
            state: ExecutionState::Error,
            progress: None,
            error: Some(CommandError {
                code: code.to_string(),
                message: "nope".to_string(),
            }),
            results: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_execute_returns_error_envelope_unchanged() {
        let mock = Arc::new(MockTransport::new());
        mock.push_execute(error_result("disabledCommand"));
        let executor = executor_with(&mock);

        let result = executor
            .execute(&Command::new("camera.takePicture"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.state, ExecutionState::Error);
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_issues_no_request() {
        let mock = Arc::new(MockTransport::new());
        let executor = executor_with(&mock);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor.state(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_while_awaiting_response() {
        let executor = CommandExecutor::new(Arc::new(StalledTransport));
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = executor
            .execute(&Command::new("camera.takePicture"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() >= std::time::Duration::from_millis(250));

        let mut consumed = false;
        let err = executor
            .execute_streaming(&Command::new("camera.getLivePreview"), &cancel, |_body| {
                consumed = true;
                async { Ok(()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!consumed);
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let mock = Arc::new(MockTransport::new());
        mock.push_status_error(OscError::Http {
            status: 500,
            body: String::new(),
        });
        let executor = executor_with(&mock);

        let err = executor
            .status("7", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OscError::Http { status: 500, .. }));
        assert_eq!(mock.requests(), vec![RecordedRequest::Status("7".to_string())]);
    }

    #[tokio::test]
    async fn test_streaming_hands_body_to_consumer() {
        let mock = Arc::new(MockTransport::new());
        mock.push_stream(None, vec![encode_multipart("B", &[b"abc"])]);
        let executor = executor_with(&mock);

        let command = Command::new("camera.getLivePreview")
            .with_parameters(json!({"sessionId": "SID_0001"}))
            .unwrap();
        let received = executor
            .execute_streaming(&command, &CancellationToken::new(), |body| async move {
                let chunks: Vec<_> = body.chunks.collect().await;
                Ok(chunks.len())
            })
            .await
            .unwrap();

        assert_eq!(received, Some(1));
        assert_eq!(mock.requests(), vec![RecordedRequest::Stream(command)]);
    }

    #[tokio::test]
    async fn test_streaming_error_envelope_is_protocol_error() {
        let mock = Arc::new(MockTransport::new());
        mock.push_stream_script(MockStream::Envelope(error_result("serviceUnavailable")));
        let executor = executor_with(&mock);

        let err = executor
            .execute_streaming(
                &Command::new("camera.getLivePreview"),
                &CancellationToken::new(),
                |_body| async { Ok(()) },
            )
            .await
            .unwrap_err();
        assert!(err.is_service_unavailable());
    }

    #[tokio::test]
    async fn test_streaming_done_envelope_has_no_body() {
        let mock = Arc::new(MockTransport::new());
        let mut done = error_result("unused");
        done.state = ExecutionState::Done;
        done.error = None;
        mock.push_stream_script(MockStream::Envelope(done));
        let executor = executor_with(&mock);

        let consumed = executor
            .execute_streaming(
                &Command::new("camera.getLivePreview"),
                &CancellationToken::new(),
                |_body| async { Ok(()) },
            )
            .await
            .unwrap();
        assert!(consumed.is_none());
    }
}
