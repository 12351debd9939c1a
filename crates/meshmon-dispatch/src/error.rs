use meshmon_types::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid regex path pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl ErrorCode for DispatchError {
    fn kind(&self) -> &'static str {
        "dispatch"
    }

    fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidPattern(_) => "INVALID_PATTERN",
        }
    }
}
