//! Cloudtune Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod library;
pub mod playlist;
pub mod server;
pub mod sqlite_persistence;
pub mod upload;

// Re-export commonly used types for convenience
pub use library::{GuardedLibraryStore, SqliteLibraryStore};
pub use server::{run_server, RequestsLoggingLevel};
