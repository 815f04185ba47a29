//! Documents
//!
//! - types.rs: DocumentStatus, ProcessingStatus, upload items
//! - poller.rs: DocumentPoller, tracks documents until processed
//! - upload.rs: UploadQueue and type validation

pub mod poller;
pub mod types;
pub mod upload;

pub use poller::{DocumentPoller, SharedDocuments};
pub use types::{DocumentStatus, ProcessingStatus, UploadAck, UploadItem, UploadState};
pub use upload::{mime_for, upload_file, UploadQueue};
