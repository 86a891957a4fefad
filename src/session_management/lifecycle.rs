//! Per-connection session state machine.
//!
//! `Pending -> Authenticated -> IdentityResolved -> Running -> Closed`
//!
//! Nothing is spawned or opened before the `Running` transition: a failed
//! authentication or identity lookup leaves no process and no recording
//! behind. The recording sink is opened on entering `Running` and closed on
//! entering `Closed`, whatever the outcome of the shell.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use russh::keys::PublicKey;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::types::{AuthContext, Identity};
use crate::auth::{AuthChain, UserStore};
use crate::data_capture::{Header, Recorder, RecordingOptions, ASCIICAST_VERSION};
use crate::error_handling::types::SessionError;
use crate::storage::{SessionContext, Storage};

use super::session::{PtyRequest, Session, WindowSize};
use super::session_manager::SessionManager;
use super::session_pump::SessionPump;
use super::SessionState;

/// Backends shared by every session of a server.
pub struct SessionServices {
    pub auth: AuthChain,
    pub users: Arc<dyn UserStore>,
    pub storage: Arc<dyn Storage>,
    pub manager: Arc<SessionManager>,
    pub recording: RecordingOptions,
    /// Time left to the output relay after the shell exits.
    pub drain_timeout: Duration,
}

/// What the client is told when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub exit_code: u32,
    /// Shown to the client before the exit status when the session failed.
    pub message: Option<String>,
}

impl SessionOutcome {
    fn failed(err: &SessionError) -> Self {
        Self {
            exit_code: 1,
            message: Some(err.to_string()),
        }
    }
}

pub struct SessionLifecycle {
    session: Session,
    services: Arc<SessionServices>,
    hangup: CancellationToken,
}

impl SessionLifecycle {
    pub fn new(
        session_id: Uuid,
        client_addr: SocketAddr,
        services: Arc<SessionServices>,
    ) -> Self {
        Self {
            session: Session::new(session_id, client_addr),
            services,
            hangup: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Cancelling this token hangs up the shell, if one is running. The
    /// connection cancels it when the client's channel goes away.
    pub fn hangup_token(&self) -> CancellationToken {
        self.hangup.clone()
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.session.state != expected {
            return Err(SessionError::InvalidState {
                expected,
                actual: self.session.state,
            });
        }
        Ok(())
    }

    fn auth_context(&self, user: &str) -> AuthContext {
        AuthContext::new(self.session.id, user, self.session.client_addr)
    }

    fn authenticated(&mut self, user: &str, accepted: bool) -> Result<(), SessionError> {
        if !accepted {
            return Err(SessionError::AuthFailed);
        }
        self.session.user = user.to_string();
        self.session.state = SessionState::Authenticated;
        Ok(())
    }

    /// Checks a password against the chain. A rejection leaves the session
    /// `Pending` so the client may try again.
    pub fn authenticate_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        self.expect_state(SessionState::Pending)?;
        let accepted = self
            .services
            .auth
            .authenticate_password(&self.auth_context(user), password);
        self.authenticated(user, accepted)
    }

    /// Checks a public key against the chain. A rejection leaves the session
    /// `Pending` so the client may try again.
    pub fn authenticate_public_key(
        &mut self,
        user: &str,
        key: &PublicKey,
    ) -> Result<(), SessionError> {
        self.expect_state(SessionState::Pending)?;
        let accepted = self
            .services
            .auth
            .authenticate_public_key(&self.auth_context(user), key);
        self.authenticated(user, accepted)
    }

    /// Maps the authenticated user to the OS identity the shell runs as.
    pub fn resolve_identity(&mut self) -> Result<&Identity, SessionError> {
        self.expect_state(SessionState::Authenticated)?;
        match self.services.users.get(&self.session.user) {
            Ok(identity) => {
                info!(
                    "[{}] {} resolved to uid {} gid {}",
                    self.session.id, identity.name, identity.uid, identity.gid
                );
                self.session.state = SessionState::IdentityResolved;
                Ok(self.session.identity.insert(identity))
            }
            Err(e) => {
                self.session.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    /// Stores the terminal negotiated by the client.
    pub fn set_pty(&mut self, request: PtyRequest) {
        self.session.pty = Some(request);
    }

    /// Updates the stored terminal size; only meaningful before `Running`.
    pub fn set_window_size(&mut self, size: WindowSize) {
        if let Some(pty) = self.session.pty.as_mut() {
            pty.size = size;
        }
    }

    /// Resolves the identity if needed, runs the recorded shell and closes
    /// the session. Failures are turned into an outcome for the client.
    pub async fn execute<S>(
        &mut self,
        stream: S,
        resizes: mpsc::Receiver<WindowSize>,
    ) -> SessionOutcome
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let result = self.resolve_and_run(stream, resizes).await;

        self.session.state = SessionState::Closed;
        self.session.end_time = Some(Utc::now());
        match result {
            Ok(exit_code) => {
                info!(
                    "[{}] Session for {} ended with status {}",
                    self.session.id, self.session.user, exit_code
                );
                SessionOutcome {
                    exit_code,
                    message: None,
                }
            }
            Err(e) => {
                error!(
                    "[{}] Session for {} failed: {}",
                    self.session.id, self.session.user, e
                );
                SessionOutcome::failed(&e)
            }
        }
    }

    async fn resolve_and_run<S>(
        &mut self,
        stream: S,
        resizes: mpsc::Receiver<WindowSize>,
    ) -> Result<u32, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.session.state == SessionState::Authenticated {
            self.resolve_identity()?;
        }
        self.run(stream, resizes).await
    }

    /// Runs the shell of an identity-resolved session until it exits.
    pub async fn run<S>(
        &mut self,
        stream: S,
        resizes: mpsc::Receiver<WindowSize>,
    ) -> Result<u32, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.expect_state(SessionState::IdentityResolved)?;
        let pty = self.session.pty.clone().ok_or(SessionError::NoPtyRequested)?;

        let cancel = self.services.manager.register(&self.session, &self.hangup)?;
        let result = self.run_registered(&pty, stream, resizes, cancel).await;
        self.services.manager.unregister(self.session.id);
        self.session.state = SessionState::Closed;
        result
    }

    async fn run_registered<S>(
        &mut self,
        pty: &PtyRequest,
        stream: S,
        resizes: mpsc::Receiver<WindowSize>,
        cancel: CancellationToken,
    ) -> Result<u32, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let session_id = self.session.id;
        let identity = self
            .session
            .identity
            .clone()
            .ok_or_else(|| SessionError::UserNotFound(self.session.user.clone()))?;

        let pump = SessionPump::start(
            session_id,
            Some(pty),
            &identity,
            self.services.drain_timeout,
        )?;

        // Dropping the pump on error kills the shell.
        let context = SessionContext {
            session_id,
            user: self.session.user.clone(),
            remote_addr: self.session.client_addr,
            start_time: self.session.start_time,
        };
        let sink = self.services.storage.open(&context)?;
        let recorder = Arc::new(Recorder::new(
            session_id,
            sink,
            self.services.recording.clone(),
        ));
        self.session.state = SessionState::Running;

        let header = self.header(pty, &identity);
        if let Err(e) = recorder.write_header(&header) {
            warn!("[{}] Failed to write recording header: {}", session_id, e);
        }

        let result = pump.run(stream, resizes, Arc::clone(&recorder), cancel).await;

        if let Err(e) = recorder.close() {
            warn!("[{}] Failed to close recording: {}", session_id, e);
        }
        result
    }

    fn header(&self, pty: &PtyRequest, identity: &Identity) -> Header {
        let mut env = HashMap::new();
        env.insert("TERM".to_string(), pty.term.clone());
        env.insert("SHELL".to_string(), identity.shell.clone());
        Header {
            version: ASCIICAST_VERSION,
            width: pty.size.cols,
            height: pty.size.rows,
            timestamp: Some(Utc::now().timestamp()),
            idle_time_limit: self
                .services
                .recording
                .idle_time_limit
                .map(|d| d.as_secs_f64()),
            title: Some(format!(
                "{}@{}",
                self.session.user,
                self.session.client_addr.ip()
            )),
            env,
            ..Default::default()
        }
    }
}
