use std::collections::HashMap;
use std::sync::Mutex;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error_handling::types::SessionError;
use crate::session_management::active_session::ActiveSession;
use crate::session_management::session::Session;

/// The structure related to session management
///
/// This structure keeps track of the sessions whose shell is currently
/// running, so that they can be counted, listed and shut down together.
///
/// # Fields Overview
///
/// - `active_sessions`: the running sessions, keyed by session id
/// - `max_sessions`: the maximum number of sessions running at once
pub struct SessionManager {
    active_sessions: Mutex<HashMap<Uuid, ActiveSession>>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            active_sessions: Mutex::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Records `session` as running and returns the token that stops it.
    ///
    /// The token is a child of `parent`, so whoever owns the connection can
    /// hang the session up as well as [`SessionManager::shutdown_all_sessions`].
    pub fn register(
        &self,
        session: &Session,
        parent: &CancellationToken,
    ) -> Result<CancellationToken, SessionError> {
        let mut sessions = self
            .active_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if sessions.len() >= self.max_sessions {
            warn!(
                "[{}] Refusing session for {}: {} session(s) already running",
                session.id,
                session.user,
                sessions.len()
            );
            return Err(SessionError::SessionLimitReached(self.max_sessions));
        }
        let cancel = parent.child_token();
        sessions.insert(
            session.id,
            ActiveSession {
                id: session.id,
                user: session.user.clone(),
                client_addr: session.client_addr,
                start_time: session.start_time,
                cancel: cancel.clone(),
            },
        );
        debug!(
            "[{}] Registered, {} session(s) running",
            session.id,
            sessions.len()
        );
        Ok(cancel)
    }

    pub fn unregister(&self, id: Uuid) {
        let mut sessions = self
            .active_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if sessions.remove(&id).is_some() {
            debug!("[{}] Unregistered, {} session(s) running", id, sessions.len());
        }
    }

    pub fn get_active_session_count(&self) -> usize {
        self.active_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn active_sessions(&self) -> Vec<ActiveSession> {
        self.active_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Asks every running session to hang up. Sessions unregister themselves
    /// once their shell has exited.
    pub fn shutdown_all_sessions(&self) -> usize {
        let sessions = self
            .active_sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for active_session in sessions.values() {
            active_session.cancel.cancel();
        }
        info!("Shutting down {} running session(s)", sessions.len());
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(user: &str) -> Session {
        let mut s = Session::new(Uuid::new_v4(), "127.0.0.1:40000".parse().unwrap());
        s.user = user.into();
        s
    }

    #[test]
    fn test_register_and_unregister() {
        let manager = SessionManager::new(4);
        let a = session("alice");
        let b = session("bob");

        let parent = CancellationToken::new();
        manager.register(&a, &parent).unwrap();
        manager.register(&b, &parent).unwrap();
        assert_eq!(manager.get_active_session_count(), 2);

        manager.unregister(a.id);
        assert_eq!(manager.get_active_session_count(), 1);
        assert_eq!(manager.active_sessions()[0].user, "bob");

        // Unknown ids are ignored.
        manager.unregister(Uuid::new_v4());
        assert_eq!(manager.get_active_session_count(), 1);
    }

    #[test]
    fn test_limit_is_enforced() {
        let manager = SessionManager::new(1);
        let parent = CancellationToken::new();
        manager.register(&session("alice"), &parent).unwrap();
        assert!(matches!(
            manager.register(&session("bob"), &parent),
            Err(SessionError::SessionLimitReached(1))
        ));
    }

    #[test]
    fn test_shutdown_cancels_every_session() {
        let manager = SessionManager::new(4);
        let parent = CancellationToken::new();
        let t1 = manager.register(&session("alice"), &parent).unwrap();
        let t2 = manager.register(&session("bob"), &parent).unwrap();

        assert_eq!(manager.shutdown_all_sessions(), 2);
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_parent_hangs_up_only_its_session() {
        let manager = SessionManager::new(4);
        let alice_conn = CancellationToken::new();
        let bob_conn = CancellationToken::new();
        let alice = manager.register(&session("alice"), &alice_conn).unwrap();
        let bob = manager.register(&session("bob"), &bob_conn).unwrap();

        alice_conn.cancel();
        assert!(alice.is_cancelled());
        assert!(!bob.is_cancelled());
    }
}
