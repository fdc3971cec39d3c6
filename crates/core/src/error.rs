use thiserror::Error;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote endpoint unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Remote endpoint returned status {status}")]
    RemoteStatus { status: u16 },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for TrackerError {
    fn from(e: config::ConfigError) -> Self {
        TrackerError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: TrackerError = config::ConfigError::Message("bad batch_size".into()).into();
        assert!(matches!(err, TrackerError::Config(ref m) if m.contains("bad batch_size")));
    }
}
