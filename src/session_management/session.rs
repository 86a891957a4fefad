use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::auth::types::Identity;
use crate::session_management::SessionState;

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub cols: u32,
    pub rows: u32,
}

impl WindowSize {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self { cols, rows }
    }
}

/// Terminal negotiated by the client's `pty-req`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyRequest {
    pub term: String,
    pub size: WindowSize,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user: String,
    pub client_addr: SocketAddr,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub identity: Option<Identity>,
    pub pty: Option<PtyRequest>,
    pub state: SessionState,
}

impl Session {
    pub fn new(id: Uuid, client_addr: SocketAddr) -> Self {
        Self {
            id,
            user: String::new(),
            client_addr,
            start_time: Utc::now(),
            end_time: None,
            identity: None,
            pty: None,
            state: SessionState::Pending,
        }
    }
}
