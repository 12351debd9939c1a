use meshmon_types::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("value {0:?} did not deserialize into the requested type")]
    ValueSchemaMismatch(String),
    #[error("context {0:?} did not have a consistency envelope for this node")]
    NoConsistency(String),
}

impl ErrorCode for StoreError {
    fn kind(&self) -> &'static str {
        "store"
    }

    fn code(&self) -> &'static str {
        match self {
            StoreError::ValueSchemaMismatch(_) => "VALUE_SCHEMA_MISMATCH",
            StoreError::NoConsistency(_) => "NO_CONSISTENCY",
        }
    }
}
