//! Storage Trait
//!
//! This module defines the `Storage` trait, the interface every recording
//! backend implements.
//!
//! Implementors hand out one writable sink per session. The sink is closed by
//! flushing and dropping it, which the recorder does when the session ends.

use std::io::Write;

use crate::error_handling::types::StorageError;
use crate::storage::types::SessionContext;

/// The `Storage` trait defines the interface for recording sinks.
///
/// Sinks must be named deterministically from the session start time, the
/// user name and the remote address (see [`SessionContext::file_name`]).
pub trait Storage: Send + Sync {
    /// Opens the sink for a new session.
    ///
    /// - `context` - The session being recorded.
    fn open(&self, context: &SessionContext) -> Result<Box<dyn Write + Send>, StorageError>;
}
