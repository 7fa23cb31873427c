use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response of the `state` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateResponse {
    #[serde(default)]
    pub fingerprint: String,
    pub state: CameraState,
}

/// Camera telemetry. Only `latest_file_uri` is interpreted; everything else
/// (battery, capture status, storage flags) is carried as-is in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    /// Changes exactly when a new file has been written to storage
    #[serde(
        rename = "latestFileUri",
        alias = "_latestFileUri",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub latest_file_uri: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateResponse {
    pub fn latest_file_uri(&self) -> Option<&str> {
        self.state.latest_file_uri.as_deref()
    }
}
