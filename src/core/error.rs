use thiserror::Error;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Invalid measurement: {0}")]
    Validation(String),

    #[error("Downstream write failed: {0}")]
    Write(String),

    #[error("Unable to commit batch after {retries} retries: {source}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: Box<TallyError>,
    },

    #[error("Collector has terminated and no longer accepts measurements")]
    CollectorTerminated,

    #[error("Collector terminated: {0}")]
    Terminated(std::sync::Arc<TallyError>),

    #[error("Exceeded max buffer size of {max} distinct keys for '{name}', discarding measurement")]
    BufferOverflow { name: String, max: usize },

    #[error("Client is closed and no longer buffers measurements")]
    ClientClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Inserted {inserted} measurements before failing: {source}")]
    PartialSend {
        inserted: usize,
        #[source]
        source: Box<TallyError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sampling rate must be between 0.0 and 1.0, got {0}")]
    InvalidSamplingRate(f64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("GRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

impl TallyError {
    /// Creates a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a new downstream write error
    pub fn write<S: Into<String>>(msg: S) -> Self {
        Self::Write(msg.into())
    }

    /// Creates a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Write(_) | Self::Transport(_) | Self::Http(_) => true,
            Self::Grpc(status) => {
                matches!(status.code(), tonic::Code::Unavailable | tonic::Code::DeadlineExceeded)
            },
            _ => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidSamplingRate(_) => "validation",
            Self::Write(_) | Self::RetriesExhausted { .. } => "write",
            Self::CollectorTerminated | Self::Terminated(_) => "terminated",
            Self::BufferOverflow { .. } | Self::ClientClosed => "buffer",
            Self::Transport(_) | Self::Rejected { .. } | Self::PartialSend { .. } => "transport",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Grpc(_) | Self::Http(_) => "network",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TallyError::validation("missing name");
        assert_eq!(err.to_string(), "Invalid measurement: missing name");
        assert_eq!(err.category(), "validation");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(TallyError::write("connection refused").is_recoverable());
        assert!(!TallyError::config("bad batch size").is_recoverable());
        assert!(!TallyError::CollectorTerminated.is_recoverable());
        assert!(TallyError::transport("reset by peer").is_recoverable());
    }

    #[test]
    fn test_retries_exhausted_keeps_last_error() {
        let err = TallyError::RetriesExhausted {
            retries: 3,
            source: Box::new(TallyError::write("disk full")),
        };
        assert_eq!(
            err.to_string(),
            "Unable to commit batch after 3 retries: Downstream write failed: disk full"
        );
        assert_eq!(err.category(), "write");
    }

    #[test]
    fn test_buffer_overflow_message() {
        let err = TallyError::BufferOverflow {
            name: "errors".to_string(),
            max: 5,
        };
        assert!(err.to_string().contains("'errors'"));
        assert_eq!(err.category(), "buffer");
    }
}
