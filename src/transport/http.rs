use super::{ByteStream, CameraTransport, PreviewBody, StreamResponse};
use crate::config::CameraConfig;
use crate::error::{OscError, Result};
use crate::protocol::{
    Command, CommandError, CommandResult, InfoResponse, StateResponse, StatusRequest,
};
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

const EXECUTE_PATH: &str = "/commands/execute";
const STATUS_PATH: &str = "/commands/status";
const STATE_PATH: &str = "/state";
const INFO_PATH: &str = "/info";

/// Error body some endpoints return alongside a non-success status
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: CommandError,
}

/// reqwest based transport talking to `http://host:port/osc`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            request_timeout: config.request_timeout(),
        })
    }

    /// Build a transport for an explicit base URL such as `http://127.0.0.1:8080/osc`
    pub fn with_base_url<S: Into<String>>(base_url: S, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&T>,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let url = self.url(path);
        // Cameras typically serve one connection at a time
        let mut request = self.client.post(&url).header(CONNECTION, "close");
        if let Some(body) = body {
            let payload = serde_json::to_vec(body)?;
            trace!(url = %url, payload = %String::from_utf8_lossy(&payload), "POST");
            request = request.header(CONTENT_TYPE, "application/json").body(payload);
        } else {
            trace!(url = %url, "POST without body");
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        Ok(request.send().await?)
    }
}

#[async_trait]
impl CameraTransport for HttpTransport {
    async fn execute(&self, command: &Command) -> Result<CommandResult> {
        let response = self
            .post_json(EXECUTE_PATH, Some(command), Some(self.request_timeout))
            .await?;
        decode_response(response).await
    }

    async fn status(&self, request: &StatusRequest) -> Result<CommandResult> {
        let response = self
            .post_json(STATUS_PATH, Some(request), Some(self.request_timeout))
            .await?;
        decode_response(response).await
    }

    async fn state(&self) -> Result<StateResponse> {
        let response = self
            .post_json::<()>(STATE_PATH, None, Some(self.request_timeout))
            .await?;
        decode_response(response).await
    }

    async fn info(&self) -> Result<InfoResponse> {
        let url = self.url(INFO_PATH);
        trace!(url = %url, "GET");
        let response = self
            .client
            .get(&url)
            .header(CONNECTION, "close")
            .timeout(self.request_timeout)
            .send()
            .await?;
        decode_response(response).await
    }

    async fn execute_stream(&self, command: &Command) -> Result<StreamResponse> {
        // No request timeout: the body stays open for as long as the preview runs
        let response = self.post_json(EXECUTE_PATH, Some(command), None).await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        debug!(
            status = %status,
            content_type = ?content_type,
            command = %command.name,
            "Streamed command answered"
        );

        let is_json = content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
        if is_json || !status.is_success() {
            return decode_response(response).await.map(StreamResponse::Envelope);
        }

        let mut response = response;
        let chunks: ByteStream = Box::pin(stream! {
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => yield Ok::<Bytes, OscError>(chunk),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(OscError::from(e));
                        break;
                    }
                }
            }
        });

        Ok(StreamResponse::Stream(PreviewBody {
            content_type,
            chunks,
        }))
    }
}

/// Decode a JSON response body, mapping error envelopes and bare HTTP
/// failures onto typed errors
async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    trace!(status = %status, body = %body, "Camera response");

    match serde_json::from_str::<T>(&body) {
        Ok(value) => Ok(value),
        Err(e) if status.is_success() => Err(OscError::Decode(e)),
        Err(_) => match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => Err(OscError::Protocol {
                code: envelope.error.code,
                message: envelope.error.message,
            }),
            Err(_) => Err(OscError::Http {
                status: status.as_u16(),
                body,
            }),
        },
    }
}
