/// Result alias that carries the custom [`FollowError`] type.
pub type Result<T> = std::result::Result<T, FollowError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum FollowError {
    /// The audio output could not be brought up (device missing or blocked).
    #[error("audio output initialisation failed: {0}")]
    Initialization(String),
    /// A source could not be fetched or decoded.
    #[error("failed to load audio source: {0}")]
    Load(String),
    /// An operation was invoked before the component it depends on was ready.
    #[error("not ready: {0}")]
    NotReady(&'static str),
    /// Numeric configuration that cannot be clamped into something sensible.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl FollowError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }
}

impl From<&str> for FollowError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for FollowError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
