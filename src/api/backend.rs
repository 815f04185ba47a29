//! Backend traits
//!
//! The streaming and polling loops only talk to the backend through these
//! traits. `ApiClient` implements all three over HTTP.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::api::types::{
    AccessToken, ChatRecord, Credentials, MessageRequest, NewUser, UserProfile,
};
use crate::documents::types::{DocumentStatus, UploadAck};
use crate::error::Result;

/// Streamed response body, chunked at arbitrary byte boundaries
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Chat endpoints
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Create an empty chat
    async fn create_chat(&self) -> Result<ChatRecord>;

    /// Post a user message and return the streamed NDJSON answer
    async fn post_message(&self, chat_id: &str, request: &MessageRequest) -> Result<ByteStream>;

    /// Fetch a chat transcript
    async fn get_chat(&self, chat_id: &str) -> Result<ChatRecord>;

    /// List the signed-in user's chats
    async fn list_chats(&self, limit: u32, skip: u32) -> Result<Vec<ChatRecord>>;
}

/// Upload and document status endpoints
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// All documents owned by the signed-in user
    async fn list_documents(&self) -> Result<Vec<DocumentStatus>>;

    /// Current status of a single document
    async fn document_status(&self, id: &str) -> Result<DocumentStatus>;

    /// Register a new document for processing
    async fn upload_document(&self, file_name: &str, mime: &str, data: Vec<u8>) -> Result<UploadAck>;
}

/// User endpoints
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn register(&self, user: &NewUser) -> Result<UserProfile>;

    async fn login(&self, credentials: &Credentials) -> Result<AccessToken>;

    /// Profile of the user owning `token`
    async fn current_user(&self, token: &str) -> Result<UserProfile>;

    async fn logout(&self) -> Result<()>;

    /// Install or clear the credential sent with subsequent requests
    fn set_credential(&self, token: Option<String>);
}
