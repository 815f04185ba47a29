//! Chat types and observable chat state

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::types::{ChatRecord, WireMessage};

/// Identifier correlating a pending assistant message with streamed content
pub type MessageId = Uuid;

/// A message shown in the chat view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    User { content: String },
    Assistant { id: MessageId, content: String },
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: content.into(),
        }
    }

    /// Empty assistant message waiting for streamed content
    pub fn pending_assistant(id: MessageId) -> Self {
        ChatMessage::Assistant {
            id,
            content: String::new(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ChatMessage::User { content } | ChatMessage::Assistant { content, .. } => content,
        }
    }

    pub fn assistant_id(&self) -> Option<MessageId> {
        match self {
            ChatMessage::Assistant { id, .. } => Some(*id),
            ChatMessage::User { .. } => None,
        }
    }

    /// Convert a stored transcript message. Roles other than user/assistant
    /// are dropped.
    pub fn from_wire(msg: &WireMessage) -> Option<Self> {
        match msg.role.as_str() {
            "user" => Some(ChatMessage::user(msg.content.clone())),
            "assistant" => Some(ChatMessage::Assistant {
                id: Uuid::new_v4(),
                content: msg.content.clone(),
            }),
            other => {
                log::debug!("Skipping transcript message with role '{}'", other);
                None
            }
        }
    }
}

/// Step labels of the backend's analysis pipeline, indexed by step number
pub const STEP_LABELS: [&str; 5] = ["Analyzing", "MCP Link", "PDF Search", "Thinking", "Done"];

/// Label for a pipeline step, `None` outside 1..=5
pub fn step_label(step: u8) -> Option<&'static str> {
    if step == 0 {
        return None;
    }
    STEP_LABELS.get(step as usize - 1).copied()
}

/// Chat view state rendered by a presentation layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    pub current_step: u8,
    pub is_processing: bool,
    pub error: Option<String>,
}

impl ChatState {
    /// Append one character to the assistant message with `id`.
    /// Returns false if no such message exists.
    pub fn append_to(&mut self, id: MessageId, ch: char) -> bool {
        for msg in self.messages.iter_mut().rev() {
            if let ChatMessage::Assistant { id: msg_id, content } = msg {
                if *msg_id == id {
                    content.push(ch);
                    return true;
                }
            }
        }
        false
    }

    /// Content of the assistant message with `id`
    pub fn assistant_content(&self, id: MessageId) -> Option<&str> {
        self.messages.iter().find_map(|m| match m {
            ChatMessage::Assistant { id: msg_id, content } if *msg_id == id => Some(content.as_str()),
            _ => None,
        })
    }

    /// Replace the transcript with a stored chat
    pub fn load_transcript(&mut self, chat: &ChatRecord) {
        self.messages = chat.messages.iter().filter_map(ChatMessage::from_wire).collect();
        self.current_step = 0;
        self.is_processing = false;
        self.error = None;
    }
}

/// Result of a successful `send_message`
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// Chat the message was posted to
    pub chat_id: String,
    /// Assistant message that received the streamed answer
    pub message_id: MessageId,
    /// The chat created for this message, if none was given
    pub created_chat: Option<ChatRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_targets_matching_assistant_message() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut state = ChatState {
            messages: vec![
                ChatMessage::user("q1"),
                ChatMessage::pending_assistant(first),
                ChatMessage::user("q2"),
                ChatMessage::pending_assistant(second),
            ],
            ..Default::default()
        };

        assert!(state.append_to(second, 'h'));
        assert!(state.append_to(second, 'i'));
        assert!(!state.append_to(Uuid::new_v4(), 'x'));

        assert_eq!(state.assistant_content(first), Some(""));
        assert_eq!(state.assistant_content(second), Some("hi"));
    }

    #[test]
    fn test_step_labels() {
        assert_eq!(step_label(0), None);
        assert_eq!(step_label(1), Some("Analyzing"));
        assert_eq!(step_label(5), Some("Done"));
        assert_eq!(step_label(6), None);
    }

    #[test]
    fn test_message_serializes_with_role_tag() {
        let json = serde_json::to_value(ChatMessage::user("hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
    }
}
