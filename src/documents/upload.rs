//! Document uploads
//!
//! Files are validated by extension before anything is sent, then uploaded
//! one at a time. Each item reports its own state so a failed file does not
//! hide the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::api::backend::DocumentBackend;
use crate::documents::types::{UploadAck, UploadItem, UploadState};
use crate::error::{ClientError, Result};

/// Mime type for a supported document, by file extension
pub fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "doc" => Some("application/msword"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}

fn validate(path: &Path) -> Result<&'static str> {
    mime_for(path).ok_or_else(|| {
        ClientError::InvalidRequest(format!(
            "Unsupported file type: {} (expected pdf, doc, docx or txt)",
            path.display()
        ))
    })
}

/// Upload a single file and return the backend acknowledgment
pub async fn upload_file(backend: &dyn DocumentBackend, path: &Path) -> Result<UploadAck> {
    let mime = validate(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ClientError::InvalidRequest(format!("Invalid file name: {}", path.display())))?
        .to_string();

    let data = tokio::fs::read(path)
        .await
        .map_err(|e| ClientError::Storage(format!("Failed to read {}: {}", path.display(), e)))?;

    log::info!("Uploading {} ({} bytes, {})", file_name, data.len(), mime);
    backend.upload_document(&file_name, mime, data).await
}

/// Files waiting to be uploaded, with per-file state
pub struct UploadQueue {
    backend: Arc<dyn DocumentBackend>,
    items: Vec<UploadItem>,
}

impl UploadQueue {
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self {
            backend,
            items: Vec::new(),
        }
    }

    pub fn items(&self) -> &[UploadItem] {
        &self.items
    }

    /// Queue a file. Unsupported types are rejected without queueing.
    pub fn add_file(&mut self, path: impl Into<PathBuf>) -> Result<String> {
        let path = path.into();
        validate(&path)?;

        let id = Uuid::new_v4().to_string();
        self.items.push(UploadItem {
            id: id.clone(),
            path,
            state: UploadState::Pending,
        });
        Ok(id)
    }

    /// Queue several files, skipping unsupported ones. Returns how many were
    /// queued.
    pub fn add_files<I, P>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        paths
            .into_iter()
            .filter_map(|path| match self.add_file(path) {
                Ok(id) => Some(id),
                Err(e) => {
                    log::warn!("Skipping file: {}", e);
                    None
                }
            })
            .count()
    }

    /// Drop an item that is not currently uploading
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items
            .retain(|item| item.id != id || item.state == UploadState::Uploading);
        self.items.len() != before
    }

    /// Upload every pending item in order. `on_update` sees each state
    /// change. Returns the number of files uploaded successfully.
    pub async fn upload_all<F>(&mut self, on_update: F) -> usize
    where
        F: Fn(&UploadItem),
    {
        let mut uploaded = 0;
        for index in 0..self.items.len() {
            if self.items[index].state != UploadState::Pending {
                continue;
            }

            self.items[index].state = UploadState::Uploading;
            on_update(&self.items[index]);

            let path = self.items[index].path.clone();
            self.items[index].state = match upload_file(self.backend.as_ref(), &path).await {
                Ok(ack) => {
                    uploaded += 1;
                    UploadState::Complete {
                        document_id: ack.document_id,
                    }
                }
                Err(e) => {
                    log::error!("Upload of {} failed: {}", path.display(), e);
                    UploadState::Error(e.to_string())
                }
            };
            on_update(&self.items[index]);
        }
        uploaded
    }
}
