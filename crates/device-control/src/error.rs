use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControlError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    /// Camera unreachable or the request timed out
    #[error("connection error: {0}")]
    Connection(String),

    #[error("credentials rejected: {0}")]
    Auth(String),

    /// Malformed or unexpected response
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A live PTZ, imaging or preset call failed on an established session
    #[error("command failed: {0}")]
    Command(String),

    #[error("camera is not connected")]
    NotConnected,

    #[error("preset not found: {0}")]
    PresetNotFound(String),

    #[error("preset name '{0}' is used by more than one preset")]
    DuplicatePresetName(String),
}

impl ControlError {
    /// Reclassify a transport or protocol failure that happened after `connect`.
    pub fn into_command(self) -> Self {
        match self {
            Self::Connection(msg) | Self::Auth(msg) | Self::Protocol(msg) => Self::Command(msg),
            other => other,
        }
    }
}
