//! RiskSense HTTP API
//!
//! - backend.rs: ChatBackend, DocumentBackend, AuthBackend traits
//! - client.rs: ApiClient, the reqwest implementation
//! - types.rs: request and response bodies

pub mod backend;
pub mod client;
pub mod types;

pub use backend::{AuthBackend, ByteStream, ChatBackend, DocumentBackend};
pub use client::ApiClient;
pub use types::{ChatRecord, MessageRequest, UserProfile, WireMessage};
