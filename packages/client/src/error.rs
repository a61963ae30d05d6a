//! Error types for the MapsApp client.

use thiserror::Error;

use crate::domain::ApplicationId;

/// Real-time channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel is not connected
    #[error("Channel is not connected")]
    NotConnected,

    /// Connection attempt failed
    #[error("Connection error: {0}")]
    ConnectionFailed(String),

    /// Connection attempt did not finish in time
    #[error("Connection timed out after {0} ms")]
    ConnectTimeout(u64),

    /// The server refused the namespace connection
    #[error("Server rejected the connection: {0}")]
    Rejected(String),

    /// A frame could not be sent
    #[error("Failed to send frame: {0}")]
    SendFailed(String),

    /// A frame could not be parsed
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// REST API errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request did not complete within the client timeout
    #[error("Request timed out")]
    Timeout,

    /// Transport-level failure (DNS, TLS, connection reset, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with a non-success status
    #[error("Server responded with {status}")]
    Status {
        status: u16,
        message: Option<String>,
    },

    /// Response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Message to show the user: the server's own message when it sent one,
    /// otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::Status {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => message.clone(),
            _ => fallback.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ApiError::Timeout
        } else if error.is_decode() {
            ApiError::Decode(error.to_string())
        } else {
            ApiError::Network(error.to_string())
        }
    }
}

/// Device location errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    /// The user denied (or permanently blocked) location access
    #[error("Location permission denied")]
    PermissionDenied,

    /// No fix arrived within the watch timeout
    #[error("Location request timed out")]
    Timeout,

    /// The location provider is unavailable
    #[error("Location provider unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Shared Location Context errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The handle outlived its provider
    #[error("Location context used outside of its provider")]
    OutsideProvider,
}

/// Umbrella error for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Context(#[from] ContextError),

    /// Session storage failure
    #[error("Session storage error: {0}")]
    Session(String),

    /// An action required a logged-in user
    #[error("No user is logged in")]
    NotLoggedIn,

    /// The application was already decided
    #[error("Application {0} is not pending")]
    NotPending(ApplicationId),
}
