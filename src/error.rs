use thiserror::Error;

/// Result type for Evok operations
pub type Result<T> = std::result::Result<T, EvokError>;

/// Errors that can occur when talking to a UniPi controller
#[derive(Error, Debug)]
pub enum EvokError {
    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The controller closed the connection mid-operation
    #[error("Connection closed")]
    ConnectionClosed,

    /// No live connection to the controller
    #[error("Not connected")]
    NotConnected,

    /// Request timed out waiting for the controller
    #[error("Request timeout")]
    Timeout,

    /// HTTP error from the REST endpoint
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Controller URL could not be built from the configuration
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid or unexpected response from the controller
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl EvokError {
    /// Whether this error means the peer went away, as opposed to an
    /// unexpected failure while talking to it.
    pub fn is_connection_closed(&self) -> bool {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match self {
            EvokError::ConnectionClosed => true,
            EvokError::WebSocket(e) => matches!(
                e,
                WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_)
            ),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for EvokError {
    fn from(e: toml::de::Error) -> Self {
        EvokError::Config(e.to_string())
    }
}
