//! Signed-in session and its on-disk store

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::types::UserProfile;
use crate::error::{ClientError, Result};

/// The signed-in user and the credential sent as the `access_token` cookie
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub user: UserProfile,
    pub access_token: String,
    pub signed_in_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user: UserProfile, access_token: String) -> Self {
        Self {
            user,
            access_token,
            signed_in_at: Utc::now(),
        }
    }
}

/// JSON file holding the current session
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted session, `None` if nobody is signed in
    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            ClientError::Storage(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        let session = serde_json::from_str(&raw).map_err(|e| {
            ClientError::Storage(format!("Corrupt session file {}: {}", self.path.display(), e))
        })?;
        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ClientError::Storage(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, json).map_err(|e| {
            ClientError::Storage(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        log::debug!("Session saved to {}", self.path.display());
        Ok(())
    }

    /// Remove the persisted session. Succeeds if there was none.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClientError::Storage(format!(
                "Failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
