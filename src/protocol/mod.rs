mod command;
mod info;
mod state;

pub use command::{
    Command, CommandError, CommandProgress, CommandResult, ExecutionState, FileUriResults,
    SessionParameters, SessionResults, SetOptionsParameters, StatusRequest,
};
pub use info::{Endpoints, InfoResponse};
pub use state::{CameraState, StateResponse};

/// Command names understood by the camera
pub mod commands {
    pub const START_SESSION: &str = "camera.startSession";
    pub const CLOSE_SESSION: &str = "camera.closeSession";
    pub const SET_OPTIONS: &str = "camera.setOptions";
    pub const TAKE_PICTURE: &str = "camera.takePicture";
    pub const GET_LIVE_PREVIEW: &str = "camera.getLivePreview";
}
