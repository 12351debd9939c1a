use meshmon_types::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("no verifier known for node {0:?}")]
    KeyUnknown(String),
    #[error("signature did not verify")]
    SignatureInvalid,
    #[error("failed to read key file {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse key material: {0}")]
    Parse(String),
}

impl ErrorCode for CryptoError {
    fn kind(&self) -> &'static str {
        "crypto"
    }

    fn code(&self) -> &'static str {
        match self {
            CryptoError::KeyUnknown(_) => "KEY_UNKNOWN",
            CryptoError::SignatureInvalid => "SIGNATURE_INVALID",
            CryptoError::Io { .. } => "KEY_FILE_IO",
            CryptoError::Parse(_) => "KEY_PARSE",
        }
    }
}
