use meshmon_types::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("first packet on stream was not ConnectionInit")]
    InvalidInitialPacket,
    #[error("packet validator failed to decode: {0}")]
    ValidatorDecode(#[from] serde_json::Error),
    #[error("packet validator failed verification")]
    ValidatorRejected,
    #[error("no dialable address configured for peer {0:?}")]
    NoAddress(String),
    #[error("transport channel error: {0}")]
    Channel(#[from] tonic::transport::Error),
    #[error("grpc call failed: {0}")]
    Status(#[from] tonic::Status),
    #[error("store merge failed: {0}")]
    Store(#[from] meshmon_store::StoreError),
}

impl ErrorCode for TransportError {
    fn kind(&self) -> &'static str {
        "transport"
    }

    fn code(&self) -> &'static str {
        match self {
            TransportError::InvalidInitialPacket => "INVALID_INITIAL_PACKET",
            TransportError::ValidatorDecode(_) => "VALIDATOR_DECODE",
            TransportError::ValidatorRejected => "VALIDATOR_REJECTED",
            TransportError::NoAddress(_) => "NO_ADDRESS",
            TransportError::Channel(_) => "CHANNEL",
            TransportError::Status(_) => "STATUS",
            TransportError::Store(_) => "STORE",
        }
    }
}
