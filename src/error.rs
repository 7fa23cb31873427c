use thiserror::Error;

/// Error code the camera answers with while it is busy (e.g. mid-capture)
pub const SERVICE_UNAVAILABLE: &str = "serviceUnavailable";

#[derive(Error, Debug)]
pub enum OscError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to communicate with camera: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Camera responded with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to decode camera response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Camera reported error {code}: {message}")]
    Protocol { code: String, message: String },

    #[error("Live preview decode error: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("System error: {message}")]
    System { message: String },
}

/// Malformed multipart data in a live preview body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
    #[error("Stream did not start with a boundary line")]
    MissingBoundary,

    #[error("Part header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("Malformed part header line: {line}")]
    MalformedHeader { line: String },

    #[error("Stream ended inside a part")]
    Truncated,
}

impl OscError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn protocol<S: Into<String>>(code: S, message: S) -> Self {
        Self::Protocol {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Protocol error code, if this is a camera-reported failure
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Protocol { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_service_unavailable(&self) -> bool {
        self.code() == Some(SERVICE_UNAVAILABLE)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, OscError>;
