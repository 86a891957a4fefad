//! Network subsystem
//!
//! Components:
//! - `ssh_server`: listening socket, russh configuration and accept loop.
//! - `ssh_handler`: per-connection russh handler driving a session lifecycle.

pub mod ssh_handler;
pub mod ssh_server;

pub use ssh_handler::SshHandler;
pub use ssh_server::SshServer;
