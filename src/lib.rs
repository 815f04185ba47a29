// RiskSense client - chat and document analysis over the RiskSense API
//
// This crate includes:
// - Streamed chat answers rendered through a character drain buffer
// - Document status polling until processing finishes
// - Authentication with a persisted session
// - Document uploads

// Tick logging macros, used by the drain emitter and the poller
#[macro_use]
pub mod macros;

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod documents;
pub mod error;
pub mod session;
pub mod state;

pub use api::{ApiClient, AuthBackend, ChatBackend, DocumentBackend};
pub use auth::AuthService;
pub use chat::{ChatMessage, ChatState, ChatStream, SendOutcome, StreamPhase};
pub use config::ClientConfig;
pub use documents::{DocumentPoller, DocumentStatus, ProcessingStatus, UploadQueue};
pub use error::{ClientError, Result};
pub use session::{Session, SessionStore};
pub use state::AppContext;
