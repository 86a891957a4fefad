use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Registry entry for a session whose shell is running.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub id: Uuid,
    pub user: String,
    pub client_addr: SocketAddr,
    pub start_time: DateTime<Utc>,
    /// Cancelling kills the shell and ends the session.
    pub cancel: CancellationToken,
}
