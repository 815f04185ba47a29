//! Chat task registry - tracks in-flight stream sessions

use std::sync::Arc;

use dashmap::DashMap;

use crate::chat::drain::StreamSession;
use crate::chat::types::MessageId;

/// An in-flight assistant response and the chat it belongs to
struct ChatTask {
    chat_id: Option<String>,
    session: Arc<StreamSession>,
}

/// Registry of active stream sessions, keyed by assistant message id
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<MessageId, ChatTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session
    pub fn register(&self, session: Arc<StreamSession>) {
        self.tasks.insert(
            session.message_id(),
            ChatTask {
                chat_id: None,
                session,
            },
        );
    }

    /// Record which chat a session is streaming into, once it is known
    pub fn assign_chat(&self, message_id: MessageId, chat_id: &str) {
        if let Some(mut task) = self.tasks.get_mut(&message_id) {
            task.chat_id = Some(chat_id.to_string());
        }
    }

    /// Remove a session from the registry
    pub fn remove(&self, message_id: &MessageId) {
        self.tasks.remove(message_id);
    }

    pub fn get(&self, message_id: &MessageId) -> Option<Arc<StreamSession>> {
        self.tasks.get(message_id).map(|task| task.session.clone())
    }

    /// Cancel and remove a specific session
    pub fn cancel(&self, message_id: &MessageId) -> bool {
        match self.tasks.remove(message_id) {
            Some((_, task)) => {
                task.session.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and remove every session streaming into `chat_id`
    pub fn cancel_chat(&self, chat_id: &str) -> usize {
        let to_cancel: Vec<MessageId> = self
            .tasks
            .iter()
            .filter(|entry| entry.chat_id.as_deref() == Some(chat_id))
            .map(|entry| *entry.key())
            .collect();

        to_cancel.iter().filter(|id| self.cancel(id)).count()
    }

    /// Cancel everything, used on view teardown
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<MessageId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Whether any session is streaming into `chat_id`
    pub fn is_chat_processing(&self, chat_id: &str) -> bool {
        self.tasks
            .iter()
            .any(|entry| entry.chat_id.as_deref() == Some(chat_id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::drain::{SharedChatState, StreamPhase};
    use crate::config::DrainConfig;
    use tokio::sync::RwLock;
    use uuid::Uuid;

    fn session() -> Arc<StreamSession> {
        let state: SharedChatState = Arc::new(RwLock::new(Default::default()));
        Arc::new(StreamSession::new(Uuid::new_v4(), state, DrainConfig::default()))
    }

    #[test]
    fn test_cancel_chat_only_touches_that_chat() {
        let registry = TaskRegistry::new();
        let a = session();
        let b = session();
        registry.register(a.clone());
        registry.register(b.clone());
        registry.assign_chat(a.message_id(), "chat-a");
        registry.assign_chat(b.message_id(), "chat-b");

        assert!(registry.is_chat_processing("chat-a"));
        assert_eq!(registry.cancel_chat("chat-a"), 1);

        assert_eq!(a.phase(), StreamPhase::Cancelled);
        assert_eq!(b.phase(), StreamPhase::Idle);
        assert!(!registry.is_chat_processing("chat-a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cancel_all() {
        let registry = TaskRegistry::new();
        let sessions: Vec<_> = (0..3).map(|_| session()).collect();
        for s in &sessions {
            registry.register(s.clone());
        }

        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.is_empty());
        assert!(sessions.iter().all(|s| s.phase() == StreamPhase::Cancelled));
    }

    #[test]
    fn test_remove_does_not_cancel() {
        let registry = TaskRegistry::new();
        let s = session();
        registry.register(s.clone());
        registry.remove(&s.message_id());

        assert!(registry.get(&s.message_id()).is_none());
        assert_eq!(s.phase(), StreamPhase::Idle);
    }
}
