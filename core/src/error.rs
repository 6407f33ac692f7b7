//! Error types for the IISPPR core

use crate::roles::Capability;
use crate::ticket::{TicketAction, TicketStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Not connected")]
    Offline,

    #[error("Timed out")]
    Timeout,

    #[error("Request failed ({status}): {message}")]
    Request { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Not permitted: {0:?}")]
    Forbidden(Capability),

    #[error("Cannot {action:?} a ticket that is {from}")]
    InvalidTransition {
        from: TicketStatus,
        action: TicketAction,
    },

    #[error("Message is empty")]
    EmptyMessage,

    #[error("A message is already being sent")]
    SendInFlight,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors that only flip the connection flag instead of raising a banner.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::WebSocket(_) | Error::Offline | Error::Timeout
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Error::Timeout;
        }
        Error::Http(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Connection(format!("invalid url: {}", e))
    }
}
