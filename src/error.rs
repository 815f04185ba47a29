//! Error types for client operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the RiskSense client
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum ClientError {
    /// Request rejected or connection dropped
    #[error("Network failure: {0}")]
    Network(String),
    /// Backend answered with a non-success status
    #[error("Request failed with status {status}: {detail}")]
    Status { status: u16, detail: String },
    /// Response body was not the JSON we expected
    #[error("Invalid response: {0}")]
    Parse(String),
    /// Operation needs a signed-in session
    #[error("Not signed in")]
    NotAuthenticated,
    /// Request rejected before it was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Session file could not be read or written
    #[error("Session storage error: {0}")]
    Storage(String),
    /// Operation was cancelled by its owner
    #[error("Cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether retrying the same request later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
