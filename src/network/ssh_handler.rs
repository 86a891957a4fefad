//! russh connection handler
//!
//! One [`SshHandler`] exists per TCP connection. It feeds the protocol events
//! of that connection into a [`SessionLifecycle`]: credentials go to the
//! authentication chain, `pty-req` and `window-change` shape the terminal, and
//! the `shell` request hands the session channel to the recorded shell.
//!
//! Only a single interactive session channel is served per connection;
//! `exec` and subsystem requests are refused.
//!
//! An EOF from the client leaves the shell running. Closing the session
//! channel, or losing the connection, hangs it up.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info, warn};
use russh::keys::PublicKey;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodKind, MethodSet, Pty};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::AuthMethod;
use crate::error_handling::types::ServerError;
use crate::session_management::lifecycle::SessionServices;
use crate::session_management::{PtyRequest, SessionLifecycle, SessionState, WindowSize};

/// Window-change events buffered for a running shell before new ones are dropped.
const RESIZE_QUEUE_SIZE: usize = 16;

/// SSH method set matching the methods the chain can validate.
pub fn method_set(methods: &[AuthMethod]) -> MethodSet {
    let kinds: Vec<MethodKind> = methods
        .iter()
        .map(|method| match method {
            AuthMethod::PublicKey => MethodKind::PublicKey,
            AuthMethod::Password => MethodKind::Password,
        })
        .collect();
    MethodSet::from(kinds.as_slice())
}

pub struct SshHandler {
    session_id: Uuid,
    peer_addr: SocketAddr,
    methods: MethodSet,
    /// Taken when the shell starts.
    lifecycle: Option<SessionLifecycle>,
    /// The session channel, until the shell request turns it into a stream.
    channel: Option<Channel<Msg>>,
    channel_id: Option<ChannelId>,
    /// Resize events of the running shell.
    resize_tx: Option<mpsc::Sender<WindowSize>>,
    hangup: CancellationToken,
}

impl SshHandler {
    pub fn new(peer_addr: SocketAddr, services: Arc<SessionServices>) -> Self {
        let session_id = Uuid::new_v4();
        let methods = method_set(&services.auth.methods());
        let lifecycle = SessionLifecycle::new(session_id, peer_addr, services);
        Self {
            session_id,
            peer_addr,
            methods,
            hangup: lifecycle.hangup_token(),
            lifecycle: Some(lifecycle),
            channel: None,
            channel_id: None,
            resize_tx: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn state(&self) -> SessionState {
        self.lifecycle
            .as_ref()
            .map(|lifecycle| lifecycle.state())
            .unwrap_or(SessionState::Running)
    }

    fn reject(&self) -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(self.methods.clone()),
            partial_success: false,
        }
    }

    fn auth_result(&self, user: &str, method: &str, accepted: bool) -> Auth {
        if accepted {
            info!(
                "[{}] {} authenticated from {} with {}",
                self.session_id, user, self.peer_addr, method
            );
            Auth::Accept
        } else {
            info!(
                "[{}] Rejected {} for {} from {}",
                self.session_id, method, user, self.peer_addr
            );
            self.reject()
        }
    }

    fn is_session_channel(&self, channel: ChannelId) -> bool {
        self.channel_id == Some(channel)
    }
}

impl russh::server::Handler for SshHandler {
    type Error = ServerError;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let accepted = match self.lifecycle.as_mut() {
            Some(lifecycle) => lifecycle.authenticate_password(user, password).is_ok(),
            None => false,
        };
        Ok(self.auth_result(user, "password", accepted))
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let accepted = match self.lifecycle.as_mut() {
            Some(lifecycle) => lifecycle.authenticate_public_key(user, public_key).is_ok(),
            None => false,
        };
        Ok(self.auth_result(user, "publickey", accepted))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.state() != SessionState::Authenticated || self.channel_id.is_some() {
            warn!(
                "[{}] Refusing session channel {:?} from {}",
                self.session_id,
                channel.id(),
                self.peer_addr
            );
            return Ok(false);
        }
        debug!("[{}] Session channel {:?} opened", self.session_id, channel.id());
        self.channel_id = Some(channel.id());
        self.channel = Some(channel);
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.is_session_channel(channel) {
            let _ = session.channel_failure(channel);
            return Ok(());
        }
        let Some(lifecycle) = self.lifecycle.as_mut() else {
            let _ = session.channel_failure(channel);
            return Ok(());
        };
        debug!(
            "[{}] pty-req {} {}x{}",
            self.session_id, term, col_width, row_height
        );
        lifecycle.set_pty(PtyRequest {
            term: term.to_string(),
            size: WindowSize::new(col_width, row_height),
        });
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.is_session_channel(channel) {
            return Ok(());
        }
        let size = WindowSize::new(col_width, row_height);
        if let Some(tx) = &self.resize_tx {
            if tx.try_send(size).is_err() {
                debug!(
                    "[{}] Dropped window change to {}x{}",
                    self.session_id, col_width, row_height
                );
            }
        } else if let Some(lifecycle) = self.lifecycle.as_mut() {
            lifecycle.set_window_size(size);
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if !self.is_session_channel(channel) {
            let _ = session.channel_failure(channel);
            return Ok(());
        }
        let (Some(mut lifecycle), Some(ssh_channel)) = (self.lifecycle.take(), self.channel.take())
        else {
            let _ = session.channel_failure(channel);
            return Ok(());
        };
        let _ = session.channel_success(channel);

        let (resize_tx, resize_rx) = mpsc::channel(RESIZE_QUEUE_SIZE);
        self.resize_tx = Some(resize_tx);

        let handle = session.handle();
        let stream = ssh_channel.into_stream();
        let session_id = self.session_id;
        info!("[{}] Shell requested", session_id);

        tokio::spawn(async move {
            let outcome = lifecycle.execute(stream, resize_rx).await;
            if let Some(message) = outcome.message {
                let line = format!("{}\r\n", message);
                let _ = handle.data(channel, CryptoVec::from(line.into_bytes())).await;
            }
            if handle
                .exit_status_request(channel, outcome.exit_code)
                .await
                .is_err()
            {
                debug!("[{}] Client left before the exit status", session_id);
            }
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        });
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.is_session_channel(channel) {
            debug!("[{}] Session channel closed by client", self.session_id);
            self.hangup.cancel();
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        warn!(
            "[{}] Refusing exec request from {}: {}",
            self.session_id,
            self.peer_addr,
            String::from_utf8_lossy(data)
        );
        let _ = session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        warn!(
            "[{}] Refusing subsystem {} from {}",
            self.session_id, name, self.peer_addr
        );
        let _ = session.channel_failure(channel);
        Ok(())
    }
}

impl Drop for SshHandler {
    fn drop(&mut self) {
        // The connection is gone; a shell still running has no client left.
        self.hangup.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthChain, PasswdUserStore};
    use crate::data_capture::RecordingOptions;
    use crate::session_management::SessionManager;
    use crate::storage::FileStorage;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lost_connection_hangs_up() {
        let dir = TempDir::new().unwrap();
        let services = Arc::new(SessionServices {
            auth: AuthChain::new(),
            users: Arc::new(PasswdUserStore::new("/etc/passwd")),
            storage: Arc::new(FileStorage::new(dir.path()).unwrap()),
            manager: Arc::new(SessionManager::new(1)),
            recording: RecordingOptions::default(),
            drain_timeout: Duration::from_millis(100),
        });
        let handler = SshHandler::new("127.0.0.1:40000".parse().unwrap(), services);
        let hangup = handler.hangup.clone();
        assert!(!hangup.is_cancelled());

        drop(handler);
        assert!(hangup.is_cancelled());
    }

    #[test]
    fn test_method_set_follows_chain() {
        assert_eq!(
            method_set(&[AuthMethod::PublicKey, AuthMethod::Password]),
            MethodSet::from([MethodKind::PublicKey, MethodKind::Password].as_slice())
        );
        assert_eq!(
            method_set(&[AuthMethod::PublicKey]),
            MethodSet::from([MethodKind::PublicKey].as_slice())
        );
    }
}
