use meshmon_types::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("key {0:?} is not in allowed_keys for this context")]
    KeyNotAllowed(String),
    #[error("context name mismatch: expected {expected:?}, got {actual:?}")]
    ContextNameMismatch { expected: String, actual: String },
    #[error("block_id mismatch: expected {expected:?}, got {actual:?}")]
    BlockIdMismatch { expected: String, actual: String },
    #[error("replacement rejected: incoming block is not newer/older per its replacement_type")]
    StaleReplacement,
}

impl ErrorCode for ModelError {
    fn kind(&self) -> &'static str {
        "model"
    }

    fn code(&self) -> &'static str {
        match self {
            ModelError::KeyNotAllowed(_) => "CONTEXT_KEY_NOT_ALLOWED",
            ModelError::ContextNameMismatch { .. } => "CONTEXT_NAME_MISMATCH",
            ModelError::BlockIdMismatch { .. } => "BLOCK_ID_MISMATCH",
            ModelError::StaleReplacement => "STALE_REPLACEMENT",
        }
    }
}
