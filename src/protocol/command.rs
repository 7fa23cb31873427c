use crate::error::{OscError, Result};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Lifecycle stage of a submitted command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    InProgress,
    Done,
    Error,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::InProgress => "inProgress",
            ExecutionState::Done => "done",
            ExecutionState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::InProgress)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ExecutionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// Cameras disagree on casing ("inProgress", "INPROGRESS", "Done"), so match loosely.
impl<'de> Deserialize<'de> for ExecutionState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "inprogress" => Ok(ExecutionState::InProgress),
            "done" => Ok(ExecutionState::Done),
            "error" => Ok(ExecutionState::Error),
            other => Err(de::Error::unknown_variant(
                other,
                &["inProgress", "done", "error"],
            )),
        }
    }
}

/// Body of `commands/execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl Command {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            id: None,
            parameters: None,
        }
    }

    /// Attach parameters; values that fail to serialize are reported as decode errors
    pub fn with_parameters<P: Serialize>(mut self, parameters: P) -> Result<Self> {
        self.parameters = Some(serde_json::to_value(parameters)?);
        Ok(self)
    }
}

/// Body of `commands/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandProgress {
    pub completion: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Response envelope shared by `commands/execute` and `commands/status`.
///
/// `results` stays opaque until the caller asks for a typed view with
/// [`CommandResult::results_as`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    pub state: ExecutionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<CommandProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub results: Value,
}

impl CommandResult {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Completion reported by the camera, clamped into `[0, 1]`
    pub fn completion(&self) -> Option<f32> {
        self.progress
            .as_ref()
            .map(|p| p.completion)
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
    }

    /// Turn an `error` envelope into a typed protocol failure
    pub fn into_outcome(self) -> Result<Self> {
        match self.state {
            ExecutionState::Error => Err(self.protocol_error()),
            _ => Ok(self),
        }
    }

    fn protocol_error(&self) -> OscError {
        match &self.error {
            Some(error) => OscError::protocol(error.code.as_str(), error.message.as_str()),
            None => OscError::protocol(
                "unknown".to_string(),
                format!("Command {} failed without error details", self.name),
            ),
        }
    }

    /// Decode `results` into a command specific shape
    pub fn results_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.results.clone())?)
    }
}

// Some firmwares number their commands instead of sending string ids
fn string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id)),
        Some(Value::Number(id)) => Ok(Some(id.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "command id must be a string or a number, got {}",
            other
        ))),
    }
}

/// Results of `camera.startSession`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResults {
    pub session_id: String,
    #[serde(default)]
    pub timeout: u32,
}

/// Results of `camera.takePicture`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUriResults {
    pub file_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParameters {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOptionsParameters {
    pub session_id: String,
    pub options: Map<String, Value>,
}
