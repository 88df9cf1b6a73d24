use thiserror::Error;

/// Errors surfaced by the rig controller library
#[derive(Error, Debug)]
pub enum RigError {
    #[error("device connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("telemetry decode error: {0}")]
    Decode(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("wire framing error: {0}")]
    Framing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cue playback error: {0}")]
    Cue(String),
}

pub type Result<T> = std::result::Result<T, RigError>;
