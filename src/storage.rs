//! Storage subsystem
//!
//! This module provides the sinks recordings are written to.
//!
//! Components:
//! - `storage_trait`: the Storage trait, opening one sink per session.
//! - `types`: the session context a sink is named from.
//! - `file_storage`: filesystem-backed implementation writing one file per session.

pub mod file_storage;
pub mod storage_trait;
pub mod types;

pub use file_storage::FileStorage;
pub use storage_trait::Storage;
pub use types::SessionContext;
