use thiserror::Error;

pub type Result<T> = std::result::Result<T, PreviewError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreviewError {
    /// The stream could not be opened
    #[error("failed to open stream: {0}")]
    StreamOpen(String),

    /// A single frame could not be read or decoded
    #[error("frame read failed: {0}")]
    Read(String),

    /// The source has no more frames to give
    #[error("stream ended")]
    Ended,

    #[error("preview is already streaming")]
    AlreadyStreaming,

    #[error("failed to encode frame: {0}")]
    Encode(String),
}
