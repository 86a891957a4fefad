use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// What a storage backend knows about the session it opens a sink for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub user: String,
    pub remote_addr: SocketAddr,
    pub start_time: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(session_id: Uuid, user: &str, remote_addr: SocketAddr) -> Self {
        Self {
            session_id,
            user: user.to_string(),
            remote_addr,
            start_time: Utc::now(),
        }
    }

    /// `<unix start>_<user>_<remote addr>.jsonl`, with path and port
    /// separators in the address replaced by `_`.
    pub fn file_name(&self) -> String {
        let addr = self.remote_addr.to_string().replace([':', '/'], "_");
        let user = self.user.replace('/', "_");
        format!("{}_{}_{}.jsonl", self.start_time.timestamp(), user, addr)
    }
}
