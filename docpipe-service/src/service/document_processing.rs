//! Document processing workflows.
//!
//! This module coordinates the document lifecycle:
//! - Upload with content-hash deduplication
//! - Stage execution and retry handling
//! - Background workers and crash recovery
//! - Progress events and broadcasting
//! - Cancellation management
//! - Status, retry and delete operations

mod cancellation;
mod crud;
mod processing;
mod progress;
mod upload;
mod workers;

pub use upload::UploadOutcome;
