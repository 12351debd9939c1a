use meshmon_types::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ErrorCode for ConfigError {
    fn kind(&self) -> &'static str {
        "config"
    }

    fn code(&self) -> &'static str {
        match self {
            ConfigError::Parse { .. } => "CONFIG_PARSE",
            ConfigError::Io { .. } => "CONFIG_IO",
        }
    }
}
