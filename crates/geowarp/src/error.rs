use crate::types::LayerId;

/// Failures local to one geo image instance.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WarpError {
    #[error("failed to decode image source {src}: {reason}")]
    SourceDecodeFailure { src: String, reason: String },
    #[error("instance is not ready: {0}")]
    NotReady(&'static str),
    #[error("GPU resources exhausted: {0}")]
    ResourceExhaustion(String),
    #[error("source image has zero size")]
    EmptySource,
    #[error("invalid corner coordinates: {0}")]
    InvalidCorners(String),
    #[error("shared framebuffer is already active")]
    FramebufferBusy,
    #[error("GPU device was lost")]
    DeviceLost,
    #[error("warp program error: {0}")]
    Program(String),
    #[error("unknown {0}")]
    UnknownLayer(LayerId),
}

pub type WarpResult<T> = Result<T, WarpError>;
