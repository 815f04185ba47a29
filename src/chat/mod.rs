//! Chat streaming
//!
//! This module provides:
//! - Incremental decoding of the NDJSON answer stream
//! - A drain buffer rendering the answer one character per tick
//! - Send-message orchestration over a `ChatBackend`
//! - Cancellable in-flight sessions
//!
//! Module structure:
//! - types.rs: ChatMessage, ChatState, SendOutcome
//! - record.rs: StreamRecord, RecordDecoder
//! - drain.rs: StreamSession, StreamPhase
//! - task_registry.rs: TaskRegistry
//! - stream.rs: ChatStream

pub mod drain;
pub mod record;
pub mod stream;
pub mod task_registry;
pub mod types;

pub use drain::{SharedChatState, StreamPhase, StreamSession};
pub use record::{RecordDecoder, StreamRecord};
pub use stream::ChatStream;
pub use task_registry::TaskRegistry;
pub use types::{ChatMessage, ChatState, MessageId, SendOutcome};
