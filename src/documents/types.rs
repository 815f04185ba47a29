//! Document status and upload types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Backend processing status of an uploaded document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Processed,
    Error,
    /// Any status string this client does not know about. Treated as
    /// non-terminal so the document keeps being polled.
    #[serde(other)]
    Unknown,
}

impl ProcessingStatus {
    /// No further transition is expected after a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingStatus::Processed | ProcessingStatus::Error)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Processed => write!(f, "processed"),
            ProcessingStatus::Error => write!(f, "error"),
            ProcessingStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One uploaded document as reported by `/uploads/me` and
/// `/uploads/is-processed/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentStatus {
    pub id: String,
    pub filename: String,
    pub status: ProcessingStatus,
    #[serde(default)]
    pub percent_complete: f64,
}

impl DocumentStatus {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Acknowledgment returned by `POST /uploads/`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadAck {
    pub status: String,
    pub document_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Client-side state of one file in the upload queue
#[derive(Debug, Clone, PartialEq)]
pub enum UploadState {
    Pending,
    Uploading,
    Complete { document_id: String },
    Error(String),
}

/// A file queued for upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadItem {
    pub id: String,
    pub path: PathBuf,
    pub state: UploadState,
}
