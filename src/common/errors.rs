//! Error types for the application

use thiserror::Error;

/// Result type alias using our CoordinatorError
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Main error type for coordinator operations
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// WebSocket connection errors
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    /// WebSocket send/receive errors
    #[error("WebSocket communication error: {0}")]
    WebSocketCommunication(String),

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Broker session/authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Market/instrument not found at the broker
    #[error("Market not found: {0}")]
    MarketNotFound(String),

    /// Bot configuration not found in the repository
    #[error("Bot not found: {0}")]
    BotNotFound(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for CoordinatorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        CoordinatorError::WebSocketCommunication(err.to_string())
    }
}
