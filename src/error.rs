//! Error types for teamsrelay.

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl Error {
    /// Whether this error stems from an optimistic-concurrency conflict on
    /// the durable conversation store. Used by turn recovery to pick the
    /// "restart the flow" path instead of the generic failure path.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Error::State(StateError::VersionConflict { .. }))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors from the dual-endpoint backend caller.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Both the primary and the fallback endpoint failed. `reason` is the
    /// fallback's error; the primary's error is logged at the call site and
    /// not carried here, so callers only ever see one failure.
    #[error("Backend unavailable for {method} {path}: {reason}")]
    Unavailable {
        method: String,
        path: String,
        reason: String,
    },

    #[error("Backend returned HTTP {status} for {method} {path}")]
    Status {
        status: u16,
        method: String,
        path: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),
}

/// Durable conversation-store errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The stored version advanced since this process last loaded the
    /// conversation. Recoverable by reloading and re-applying updates.
    #[error("Version conflict saving conversation {conversation_id}")]
    VersionConflict { conversation_id: String },

    #[error("Store operation failed: {0}")]
    Store(String),

    #[error("State serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Chat-transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message on conversation {conversation_id}: {reason}")]
    SendFailed {
        conversation_id: String,
        reason: String,
    },

    #[error("Invalid activity: {0}")]
    InvalidActivity(String),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
