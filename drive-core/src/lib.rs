//! Remote folder access for the Drive sync engine
//!
//! This crate provides the provider abstraction the engine walks and
//! downloads through, a Google Drive v3 implementation of it, an in-memory
//! implementation for tests and demos, and folder id parsing.

pub mod client;
pub mod error;
pub mod folder_id;
pub mod memory;
pub mod provider;
pub mod types;

pub use client::{DriveClient, DriveClientBuilder, DEFAULT_API_BASE};
pub use error::{ProviderError, Result};
pub use folder_id::{is_valid_folder_id, parse_folder_id};
pub use memory::MemoryProvider;
pub use provider::FolderProvider;
pub use types::{ApiKey, ExportFormat, RemoteEntry, FOLDER_MIME_TYPE};
