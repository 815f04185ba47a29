//! Wire types for the RiskSense HTTP API

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A message as stored in a chat transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(default)]
    pub tool_calls: Option<Vec<String>>,
}

/// A chat as returned by `/chats/` and `/chats/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

/// Body of `POST /chats/`
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewChat {
    pub title: Option<String>,
    pub summary: Option<String>,
}

/// Body of `POST /chats/{id}/messages`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageRequest {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
}

impl MessageRequest {
    pub fn user(content: impl Into<String>, doc_id: Option<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
            doc_id,
        }
    }
}

/// Body of `POST /users/`
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// Body of `POST /users/login`
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Public profile of a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// Response of `POST /users/login`
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// FastAPI error body
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}
