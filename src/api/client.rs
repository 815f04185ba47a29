//! HTTP client for the RiskSense API
//!
//! Authenticated requests carry the session token as the `access_token`
//! cookie, the same credential the backend sets on login.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::COOKIE;
use reqwest::{Client, RequestBuilder, Response};

use crate::api::backend::{AuthBackend, ByteStream, ChatBackend, DocumentBackend};
use crate::api::types::{
    AccessToken, ChatRecord, Credentials, ErrorBody, MessageRequest, NewChat, NewUser, UserProfile,
};
use crate::config::ClientConfig;
use crate::documents::types::{DocumentStatus, UploadAck};
use crate::error::{ClientError, Result};

/// RiskSense API client
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
    credential: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            credential: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a credential is installed
    pub fn has_credential(&self) -> bool {
        self.credential
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the session cookie when one is installed
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = self.credential.read().ok().and_then(|guard| guard.clone());
        match token {
            Some(token) => builder.header(COOKIE, format!("access_token={}", token)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("Request failed: {}", e)))?;
        check_status(response).await
    }

    async fn send_json<T: serde::de::DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Parse(format!("Invalid response: {}", e)))
    }
}

/// Turn a non-success response into `ClientError::Status`
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        detail: extract_detail(&body),
    })
}

/// Pull the `detail` message out of a FastAPI error body, falling back to
/// the raw text
fn extract_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(message),
        }) => message,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn create_chat(&self) -> Result<ChatRecord> {
        let builder = self.client.post(self.url("/chats/")).json(&NewChat::default());
        let chat: ChatRecord = self.send_json(builder).await?;
        log::info!("Created chat {}", chat.id);
        Ok(chat)
    }

    async fn post_message(&self, chat_id: &str, request: &MessageRequest) -> Result<ByteStream> {
        let builder = self
            .client
            .post(self.url(&format!("/chats/{}/messages", chat_id)))
            .json(request);
        let response = self.send(builder).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ClientError::Network(format!("Stream error: {}", e))));
        Ok(Box::pin(stream))
    }

    async fn get_chat(&self, chat_id: &str) -> Result<ChatRecord> {
        let builder = self.client.get(self.url(&format!("/chats/{}", chat_id)));
        self.send_json(builder).await
    }

    async fn list_chats(&self, limit: u32, skip: u32) -> Result<Vec<ChatRecord>> {
        let builder = self
            .client
            .get(self.url("/chats/"))
            .query(&[("limit", limit), ("skip", skip)]);
        self.send_json(builder).await
    }
}

#[async_trait]
impl DocumentBackend for ApiClient {
    async fn list_documents(&self) -> Result<Vec<DocumentStatus>> {
        let builder = self.client.get(self.url("/uploads/me"));
        self.send_json(builder).await
    }

    async fn document_status(&self, id: &str) -> Result<DocumentStatus> {
        let builder = self
            .client
            .get(self.url(&format!("/uploads/is-processed/{}", id)));
        self.send_json(builder).await
    }

    async fn upload_document(&self, file_name: &str, mime: &str, data: Vec<u8>) -> Result<UploadAck> {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| ClientError::InvalidRequest(format!("Bad content type '{}': {}", mime, e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let builder = self.client.post(self.url("/uploads/")).multipart(form);
        let ack: UploadAck = self.send_json(builder).await?;
        log::info!("Uploaded '{}' as document {}", file_name, ack.document_id);
        Ok(ack)
    }
}

#[async_trait]
impl AuthBackend for ApiClient {
    async fn register(&self, user: &NewUser) -> Result<UserProfile> {
        let builder = self.client.post(self.url("/users/")).json(user);
        self.send_json(builder).await
    }

    async fn login(&self, credentials: &Credentials) -> Result<AccessToken> {
        let builder = self.client.post(self.url("/users/login")).json(credentials);
        self.send_json(builder).await
    }

    async fn current_user(&self, token: &str) -> Result<UserProfile> {
        let builder = self
            .client
            .get(self.url("/users/me"))
            .header(COOKIE, format!("access_token={}", token));
        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("Request failed: {}", e)))?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Parse(format!("Invalid response: {}", e)))
    }

    async fn logout(&self) -> Result<()> {
        let builder = self.client.post(self.url("/users/logout"));
        self.send(builder).await?;
        Ok(())
    }

    fn set_credential(&self, token: Option<String>) {
        match self.credential.write() {
            Ok(mut guard) => *guard = token,
            Err(e) => log::error!("Credential lock poisoned: {}", e),
        }
    }
}
