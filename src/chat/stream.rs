//! Send-message orchestration
//!
//! Creates the chat if needed, posts the user message, and feeds the
//! streamed answer into a `StreamSession`. The call returns once the network
//! stream has ended; rendering of queued characters continues in the
//! background until the session reaches `Done`.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::api::backend::ChatBackend;
use crate::api::types::{ChatRecord, MessageRequest};
use crate::chat::drain::{SharedChatState, StreamPhase, StreamSession};
use crate::chat::task_registry::TaskRegistry;
use crate::chat::types::{ChatMessage, ChatState, MessageId, SendOutcome};
use crate::config::DrainConfig;
use crate::error::{ClientError, Result};

/// Chat view controller: owns the observable chat state and the sessions
/// streaming into it
pub struct ChatStream {
    backend: Arc<dyn ChatBackend>,
    state: SharedChatState,
    registry: Arc<TaskRegistry>,
    drain: DrainConfig,
}

impl ChatStream {
    pub fn new(backend: Arc<dyn ChatBackend>, drain: DrainConfig) -> Self {
        Self {
            backend,
            state: Arc::new(RwLock::new(ChatState::default())),
            registry: Arc::new(TaskRegistry::new()),
            drain,
        }
    }

    /// Shared handle to the observable chat state
    pub fn state(&self) -> SharedChatState {
        self.state.clone()
    }

    /// Copy of the current chat state
    pub async fn snapshot(&self) -> ChatState {
        self.state.read().await.clone()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Send a user message and stream the assistant's answer.
    ///
    /// Blank input is ignored and returns `Ok(None)`. On failure the error is
    /// also recorded in the chat state and processing ends.
    pub async fn send_message(
        &self,
        input: &str,
        chat_id: Option<&str>,
        doc_id: Option<&str>,
    ) -> Result<Option<SendOutcome>> {
        if input.trim().is_empty() {
            return Ok(None);
        }

        let message_id = Uuid::new_v4();
        {
            let mut state = self.state.write().await;
            state.is_processing = true;
            state.current_step = 1;
            state.error = None;
            state.messages.push(ChatMessage::user(input));
            state.messages.push(ChatMessage::pending_assistant(message_id));
        }

        let session = Arc::new(StreamSession::new(
            message_id,
            self.state.clone(),
            self.drain.clone(),
        ));
        self.registry.register(session.clone());

        match self.stream_answer(&session, input, chat_id, doc_id).await {
            Ok(outcome) => {
                self.remove_when_finished(session);
                Ok(Some(outcome))
            }
            Err(e) => {
                session.fail(e.to_string()).await;
                self.registry.remove(&message_id);
                Err(e)
            }
        }
    }

    async fn stream_answer(
        &self,
        session: &StreamSession,
        input: &str,
        chat_id: Option<&str>,
        doc_id: Option<&str>,
    ) -> Result<SendOutcome> {
        let message_id = session.message_id();

        let (chat_id, created) = match chat_id {
            Some(id) => (id.to_string(), false),
            None => (self.backend.create_chat().await?.id, true),
        };
        self.registry.assign_chat(message_id, &chat_id);

        let request = MessageRequest::user(input, doc_id.map(str::to_string));
        let mut body = self.backend.post_message(&chat_id, &request).await?;
        session.start();

        let cancel = session.cancel_token();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(bytes) => session.on_chunk(&bytes?).await,
                None => break,
            }
        }
        session.on_network_done().await;

        let created_chat = if created {
            match self.backend.get_chat(&chat_id).await {
                Ok(chat) => Some(chat),
                Err(e) => {
                    log::warn!("Failed to fetch new chat {}: {}", chat_id, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(SendOutcome {
            chat_id,
            message_id,
            created_chat,
        })
    }

    /// Drop the session from the registry once it stops rendering
    fn remove_when_finished(&self, session: Arc<StreamSession>) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let phase = session.wait().await;
            log::debug!("Stream {} ended in {:?}", session.message_id(), phase);
            registry.remove(&session.message_id());
        });
    }

    /// Wait for a message's session to stop rendering. Returns `None` if the
    /// session is no longer registered.
    pub async fn wait_for(&self, message_id: MessageId) -> Option<StreamPhase> {
        let session = self.registry.get(&message_id)?;
        Some(session.wait().await)
    }

    /// Replace the transcript with a stored chat
    pub async fn load_chat(&self, chat_id: &str) -> Result<ChatRecord> {
        let chat = self.backend.get_chat(chat_id).await?;
        self.state.write().await.load_transcript(&chat);
        Ok(chat)
    }

    /// Chats of the signed-in user
    pub async fn list_chats(&self, limit: u32, skip: u32) -> Result<Vec<ChatRecord>> {
        self.backend.list_chats(limit, skip).await
    }

    /// Cancel every in-flight session (view teardown)
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            log::info!("Cancelled {} in-flight chat stream(s)", cancelled);
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::backend::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeChatBackend {
        chunks: Mutex<Vec<Result<Bytes>>>,
        hang_after_chunks: bool,
        reject_post: Option<ClientError>,
        requests: Mutex<Vec<(String, MessageRequest)>>,
        created: Mutex<u32>,
    }

    impl FakeChatBackend {
        fn with_chunks(chunks: &[&str]) -> Self {
            Self {
                chunks: Mutex::new(
                    chunks
                        .iter()
                        .map(|c| Ok(Bytes::from(c.to_string())))
                        .collect(),
                ),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ChatBackend for FakeChatBackend {
        async fn create_chat(&self) -> Result<ChatRecord> {
            *self.created.lock().unwrap() += 1;
            Ok(chat_record("new-chat", None))
        }

        async fn post_message(&self, chat_id: &str, request: &MessageRequest) -> Result<ByteStream> {
            self.requests
                .lock()
                .unwrap()
                .push((chat_id.to_string(), request.clone()));
            if let Some(e) = &self.reject_post {
                return Err(e.clone());
            }
            let chunks = std::mem::take(&mut *self.chunks.lock().unwrap());
            let body = stream::iter(chunks);
            if self.hang_after_chunks {
                Ok(Box::pin(body.chain(stream::pending())))
            } else {
                Ok(Box::pin(body))
            }
        }

        async fn get_chat(&self, chat_id: &str) -> Result<ChatRecord> {
            Ok(chat_record(chat_id, Some("Liquidity risk")))
        }

        async fn list_chats(&self, _limit: u32, _skip: u32) -> Result<Vec<ChatRecord>> {
            Ok(vec![chat_record("a", None), chat_record("b", None)])
        }
    }

    fn chat_record(id: &str, title: Option<&str>) -> ChatRecord {
        serde_json::from_value(serde_json::json!({
            "_id": id,
            "title": title,
            "messages": [
                {"role": "user", "content": "What are the risks?"},
                {"role": "assistant", "content": "Mostly liquidity."},
                {"role": "system", "content": "hidden"}
            ]
        }))
        .unwrap()
    }

    fn chat_with(backend: FakeChatBackend) -> (ChatStream, Arc<FakeChatBackend>) {
        let backend = Arc::new(backend);
        let drain = DrainConfig {
            tick: Duration::from_millis(1),
            completion_check: Duration::from_millis(20),
        };
        (ChatStream::new(backend.clone(), drain), backend)
    }

    async fn wait_until_idle(chat: &ChatStream) {
        for _ in 0..1000 {
            if !chat.state.read().await.is_processing {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("chat never finished processing");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_creates_chat_and_renders_answer() {
        let (chat, backend) = chat_with(FakeChatBackend::with_chunks(&[
            "{\"status\": \"Analyzing Query\", \"step\": 1}\n{\"answer\": \"Liqu",
            "idity\"}\n{\"answer\": \" risk\"}\n",
            "{\"status\": \"Complete\", \"step\": 5}\n",
        ]));

        let outcome = chat
            .send_message("What is the main risk?", None, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.chat_id, "new-chat");
        assert_eq!(
            outcome.created_chat.as_ref().and_then(|c| c.title.as_deref()),
            Some("Liquidity risk")
        );
        assert_eq!(*backend.created.lock().unwrap(), 1);

        wait_until_idle(&chat).await;
        let state = chat.snapshot().await;
        assert_eq!(state.assistant_content(outcome.message_id), Some("Liquidity risk"));
        assert_eq!(state.current_step, 5);
        assert!(state.error.is_none());
        assert_eq!(state.messages[0], ChatMessage::user("What is the main risk?"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_chat_and_doc_id_are_forwarded() {
        let (chat, backend) = chat_with(FakeChatBackend::with_chunks(&["{\"answer\": \"ok\"}\n"]));

        let outcome = chat
            .send_message("Summarize", Some("chat-7"), Some("doc-3"))
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.created_chat.is_none());
        assert_eq!(*backend.created.lock().unwrap(), 0);
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].0, "chat-7");
        assert_eq!(requests[0].1, MessageRequest::user("Summarize", Some("doc-3".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_input_is_ignored() {
        let (chat, backend) = chat_with(FakeChatBackend::default());

        assert!(chat.send_message("   \n", None, None).await.unwrap().is_none());
        assert!(backend.requests.lock().unwrap().is_empty());
        assert_eq!(chat.snapshot().await, ChatState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_mid_stream_surfaces_error() {
        let backend = FakeChatBackend {
            chunks: Mutex::new(vec![
                Ok(Bytes::from_static(b"{\"answer\": \"partial\"}\n")),
                Err(ClientError::Network("connection reset".into())),
            ]),
            ..Default::default()
        };
        let (chat, _) = chat_with(backend);

        let err = chat.send_message("Why?", Some("c1"), None).await.unwrap_err();
        assert_eq!(err, ClientError::Network("connection reset".into()));

        let state = chat.snapshot().await;
        assert!(!state.is_processing);
        assert_eq!(state.error.as_deref(), Some("Network failure: connection reset"));
        assert!(chat.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_post_leaves_empty_answer() {
        let backend = FakeChatBackend {
            reject_post: Some(ClientError::Status {
                status: 403,
                detail: "Not allowed".into(),
            }),
            ..Default::default()
        };
        let (chat, _) = chat_with(backend);

        assert!(chat.send_message("Hi", Some("c1"), None).await.is_err());
        let state = chat.snapshot().await;
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].content(), "");
        assert!(!state.is_processing);
        assert!(state.error.as_deref().unwrap().contains("Not allowed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_interrupts_hanging_stream() {
        let backend = FakeChatBackend {
            hang_after_chunks: true,
            ..FakeChatBackend::with_chunks(&["{\"answer\": \"slow\"}\n"])
        };
        let (chat, _) = chat_with(backend);
        let chat = Arc::new(chat);

        let sender = chat.clone();
        let task = tokio::spawn(async move { sender.send_message("Hi", Some("c1"), None).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(chat.registry().is_chat_processing("c1"));
        assert_eq!(chat.cancel_all(), 1);

        let result = task.await.unwrap();
        assert_eq!(result.unwrap_err(), ClientError::Cancelled);
        assert!(chat.registry().is_empty());
    }

    #[tokio::test]
    async fn test_load_chat_replaces_transcript() {
        let (chat, _) = chat_with(FakeChatBackend::default());
        chat.load_chat("c9").await.unwrap();

        let state = chat.snapshot().await;
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].content(), "Mostly liquidity.");
        assert!(state.messages[1].assistant_id().is_some());
    }
}
