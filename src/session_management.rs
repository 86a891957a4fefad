//! Session management core module.
//!
//! This module provides the per-connection state machine that takes a client
//! from authentication to a recorded shell, and the pieces it drives:
//! session data, pty allocation, the relay pump and the registry of running
//! sessions.

use serde::{Deserialize, Serialize};

/// Submodule for the registry entry of a running session.
pub mod active_session;
/// Submodule for the authenticate/resolve/run/close state machine.
pub mod lifecycle;
/// Submodule for pty allocation and shell spawning.
pub mod pty;
/// Submodule for session data structures.
pub mod session;
/// Submodule for the registry of running sessions.
pub mod session_manager;
/// Submodule relaying and recording the bytes of one session.
pub mod session_pump;

pub use lifecycle::{SessionLifecycle, SessionOutcome, SessionServices};
pub use session::{PtyRequest, Session, WindowSize};
pub use session_manager::SessionManager;
pub use session_pump::SessionPump;

/// Represents the current state of a session.
///
/// Variants:
/// - `Pending`: The connection has not authenticated yet.
/// - `Authenticated`: A credential was accepted.
/// - `IdentityResolved`: The user maps to an OS identity.
/// - `Running`: The shell is running and being recorded.
/// - `Closed`: The session is over; terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Pending,
    Authenticated,
    IdentityResolved,
    Running,
    Closed,
}
