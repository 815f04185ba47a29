// Application context for RiskSense clients

use std::sync::Arc;

use crate::api::ApiClient;
use crate::auth::AuthService;
use crate::chat::ChatStream;
use crate::config::ClientConfig;
use crate::documents::{DocumentPoller, UploadQueue};
use crate::error::Result;
use crate::session::SessionStore;

/// Everything a front-end needs: the API client, the signed-in session and
/// the observable chat and document state.
pub struct AppContext {
    config: ClientConfig,
    api: Arc<ApiClient>,
    pub auth: AuthService,
    pub chat: ChatStream,
    pub documents: DocumentPoller,
}

impl AppContext {
    /// Build the context and restore any saved session
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config)?);
        let store = SessionStore::new(config.session_file());

        let auth = AuthService::new(api.clone(), store);
        let chat = ChatStream::new(api.clone(), config.drain.clone());
        let documents = DocumentPoller::new(api.clone(), config.poll.clone());

        let context = Self {
            config,
            api,
            auth,
            chat,
            documents,
        };

        if let Err(e) = context.auth.restore() {
            log::warn!("Ignoring unreadable saved session: {}", e);
        }
        log::info!("RiskSense client ready ({})", context.api.base_url());
        Ok(context)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn api(&self) -> Arc<ApiClient> {
        self.api.clone()
    }

    /// A new upload queue bound to this context's backend
    pub fn upload_queue(&self) -> UploadQueue {
        UploadQueue::new(self.api.clone())
    }

    /// Stop every background loop: in-flight chat streams and the poller
    pub fn shutdown(&self) {
        let cancelled = self.chat.cancel_all();
        self.documents.stop();
        log::debug!("Shutdown cancelled {} chat streams", cancelled);
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
