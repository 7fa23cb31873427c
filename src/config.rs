use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OscConfig {
    pub camera: CameraConfig,
    pub polling: PollingConfig,
    pub preview: PreviewConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Camera host name or IP address
    #[serde(default = "default_camera_host")]
    pub host: String,

    /// HTTP port of the command endpoints
    #[serde(default = "default_camera_port")]
    pub port: u16,

    /// Path prefix of the protocol endpoints
    #[serde(default = "default_camera_base_path")]
    pub base_path: String,

    /// Timeout for JSON round-trips (live preview streams are not bounded)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollingConfig {
    /// Delay between status requests for in-progress commands
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PreviewConfig {
    /// Command that returns the multipart preview body
    #[serde(default = "default_preview_command")]
    pub command: String,

    /// Parts declaring more bytes than this are dropped
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Report captures even before the first preview frame is seen
    #[serde(default = "default_resume_image_progress")]
    pub resume_image_progress: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SessionConfig {
    /// Client API version announced through camera.setOptions after opening
    pub client_version: Option<u32>,
}

impl CameraConfig {
    /// Base URL of the protocol endpoints, e.g. `http://192.168.1.1:80/osc`
    pub fn base_url(&self) -> String {
        let path = self.base_path.trim_end_matches('/');
        if path.is_empty() || path.starts_with('/') {
            format!("http://{}:{}{}", self.host, self.port, path)
        } else {
            format!("http://{}:{}/{}", self.host, self.port, path)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl OscConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("osccam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.host", default_camera_host())?
            .set_default("camera.port", default_camera_port())?
            .set_default("camera.base_path", default_camera_base_path())?
            .set_default("camera.request_timeout_seconds", default_request_timeout())?
            .set_default("camera.connect_timeout_seconds", default_connect_timeout())?
            .set_default("polling.interval_ms", default_poll_interval())?
            .set_default("preview.command", default_preview_command())?
            .set_default("preview.max_frame_bytes", default_max_frame_bytes() as i64)?
            .set_default(
                "preview.resume_image_progress",
                default_resume_image_progress(),
            )?
            .add_source(File::with_name(&path_str).required(false))
            // OSCCAM_CAMERA__HOST style overrides; a single underscore is part of key names
            .add_source(
                Environment::with_prefix("OSCCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: OscConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.host.trim().is_empty() {
            return Err(ConfigError::Message(
                "Camera host must not be empty".to_string(),
            ));
        }

        if self.camera.port == 0 {
            return Err(ConfigError::Message(
                "Camera port must be greater than 0".to_string(),
            ));
        }

        if self.camera.request_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.polling.interval_ms == 0 {
            return Err(ConfigError::Message(
                "Polling interval must be greater than 0".to_string(),
            ));
        }

        if self.preview.command.trim().is_empty() {
            return Err(ConfigError::Message(
                "Preview command must not be empty".to_string(),
            ));
        }

        if self.preview.max_frame_bytes == 0 {
            return Err(ConfigError::Message(
                "Preview max_frame_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                host: default_camera_host(),
                port: default_camera_port(),
                base_path: default_camera_base_path(),
                request_timeout_seconds: default_request_timeout(),
                connect_timeout_seconds: default_connect_timeout(),
            },
            polling: PollingConfig {
                interval_ms: default_poll_interval(),
            },
            preview: PreviewConfig {
                command: default_preview_command(),
                max_frame_bytes: default_max_frame_bytes(),
                resume_image_progress: default_resume_image_progress(),
            },
            session: SessionConfig::default(),
        }
    }
}

// Default value functions
fn default_camera_host() -> String {
    "192.168.1.1".to_string()
}
fn default_camera_port() -> u16 {
    80
}
fn default_camera_base_path() -> String {
    "/osc".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    50
}

fn default_preview_command() -> String {
    "camera.getLivePreview".to_string()
}
fn default_max_frame_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_resume_image_progress() -> bool {
    false
}
