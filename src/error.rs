// src/error.rs

/// Result type used throughout the gridpulse library
pub type GridPulseResult<T> = Result<T, GridPulseError>;

/// All possible errors that can occur in the gridpulse service
#[derive(thiserror::Error, Debug)]
pub enum GridPulseError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Upstream feed connection failed or misbehaved
    #[error("Feed error: {message}")]
    Feed { message: String },

    /// The upstream rejected our credentials; retrying with the same token
    /// is unlikely to succeed
    #[error("Feed authentication rejected: {message}")]
    FeedAuth { message: String },

    /// A sample failed validation and was discarded
    #[error("Invalid sample: {message}")]
    InvalidSample { message: String },

    /// Time-series store write or query failed
    #[error("Store error: {message}")]
    Store { message: String },

    /// Query parameters were malformed or out of range
    #[error("Invalid query: {message}")]
    Query { message: String },

    /// Supervisor is not running or has stopped
    #[error("Supervisor is not running: {message}")]
    SupervisorNotRunning { message: String },

    /// Channel communication error (internal)
    #[error("Internal channel error: {message}")]
    ChannelError { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// HTTP transport errors talking to the store
    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// IO-related errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Generic error for unexpected situations
    #[error("Unexpected error: {message}")]
    Unexpected { message: String },
}

/// Helper methods for creating common errors
impl GridPulseError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn feed<S: Into<String>>(message: S) -> Self {
        Self::Feed {
            message: message.into(),
        }
    }

    pub fn feed_auth<S: Into<String>>(message: S) -> Self {
        Self::FeedAuth {
            message: message.into(),
        }
    }

    pub fn invalid_sample<S: Into<String>>(message: S) -> Self {
        Self::InvalidSample {
            message: message.into(),
        }
    }

    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn query<S: Into<String>>(message: S) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    pub fn supervisor_not_running<S: Into<String>>(message: S) -> Self {
        Self::SupervisorNotRunning {
            message: message.into(),
        }
    }

    pub fn unexpected<S: Into<String>>(message: S) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Whether this error looks like a credentials problem rather than a
    /// transient transport failure. The reconnect policy retries both, but
    /// auth failures are logged loudly so a bad token is not mistaken for
    /// an outage.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::FeedAuth { .. })
    }
}

/// Convert from channel send errors
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GridPulseError {
    fn from(error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelError {
            message: format!("Failed to send on channel: {}", error),
        }
    }
}

/// Convert from channel receive errors
impl From<tokio::sync::oneshot::error::RecvError> for GridPulseError {
    fn from(error: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelError {
            message: format!("Failed to receive on channel: {}", error),
        }
    }
}
