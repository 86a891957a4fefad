use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OS identity a session's shell runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
}

/// What validators know about an authentication attempt.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session_id: Uuid,
    pub user: String,
    pub remote_addr: SocketAddr,
}

impl AuthContext {
    pub fn new(session_id: Uuid, user: &str, remote_addr: SocketAddr) -> Self {
        Self {
            session_id,
            user: user.to_string(),
            remote_addr,
        }
    }
}

/// SSH authentication methods a chain can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMethod {
    PublicKey,
    Password,
}
