use crate::protocol::BridgeErrorKind;
use thiserror::Error;

/// Result type for Hue ambience operations
pub type Result<T> = std::result::Result<T, HueError>;

/// Errors that can occur when talking to the directory, a bridge or its lights
#[derive(Error, Debug)]
pub enum HueError {
    /// HTTP transport error (connection refused, DNS, TLS, ...)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Request timed out waiting for response
    #[error("Request timeout")]
    Timeout,

    /// Response had an unexpected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bridge is waiting for its link button to be pressed
    #[error("Authorization pending: press the link button on the bridge")]
    AuthorizationPending,

    /// Link button was not pressed in time, or the saved token was rejected
    #[error("Authorization denied")]
    AuthorizationDenied,

    /// Bridge reported an error element
    #[error("Bridge error ({kind}): {description}")]
    Bridge {
        /// Classified error type
        kind: BridgeErrorKind,
        /// Description text sent by the bridge
        description: String,
    },

    /// Some light commands of a dispatch cycle failed
    #[error("{failed} of {total} light commands failed")]
    PartialCommandFailure {
        /// Number of commands that failed
        failed: usize,
        /// Number of commands submitted
        total: usize,
    },

    /// Session has no access token yet
    #[error("Bridge session is not authorized")]
    NotAuthorized,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Album art could not be decoded
    #[error("Image error: {0}")]
    Image(String),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(String),
}

impl HueError {
    /// Whether this error means the pairing attempt should wait for the link button
    pub fn is_link_pending(&self) -> bool {
        matches!(
            self,
            HueError::AuthorizationPending
                | HueError::Bridge {
                    kind: BridgeErrorKind::LinkButtonNotPressed,
                    ..
                }
        )
    }
}
