/// Result alias that carries the custom [`RecapError`] type.
pub type Result<T> = std::result::Result<T, RecapError>;

/// Common error type for the core crate.
///
/// Analysis-path variants are treated as non-fatal by the engine: they are
/// logged and the visual reactivity is switched off, while playback carries on.
#[derive(Debug, thiserror::Error)]
pub enum RecapError {
    /// The audio processing context could not be created or resumed, usually
    /// because the platform still requires a user gesture.
    #[error("audio processing unavailable: {0}")]
    ResourceUnavailable(String),
    /// A track could not be opened or decoded.
    #[error("failed to load `{locator}`: {reason}")]
    SourceLoad { locator: String, reason: String },
    /// The platform refused to start playback (autoplay policy, locked context).
    #[error("playback rejected: {0}")]
    PlaybackRejected(String),
    /// Configuration values outside their accepted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl RecapError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn source_load(locator: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceLoad {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<&str> for RecapError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for RecapError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
