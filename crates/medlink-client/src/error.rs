use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("{0} is not set")]
    Missing(&'static str),
}

/// Failures of a REST call, classified the way the UI reacts to them.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session expired, please log in again")]
    Unauthorized,

    #[error("access denied")]
    Forbidden,

    #[error("server error ({0}), try again later")]
    Server(StatusCode),

    #[error("request failed ({status}): {body}")]
    Status { status: StatusCode, body: String },

    /// The backend answered `success: false`
    #[error("{0}")]
    Rejected(String),

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::FORBIDDEN => Self::Forbidden,
            s if s.is_server_error() => Self::Server(s),
            s => Self::Status { status: s, body },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    pub(crate) fn rejected(message: Option<String>, fallback: &str) -> Self {
        Self::Rejected(message.unwrap_or_else(|| fallback.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
}

/// Why a send intent was refused before reaching the network.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("no conversation is open")]
    NoConversation,

    #[error("message is empty")]
    Empty,

    #[error("conversation request has not been accepted")]
    NotAccepted,

    #[error("no failed message with reference {0}")]
    UnknownMessage(String),

    #[error("session has ended")]
    SessionEnded,
}
