//! # SSH Server Module
//!
//! This module accepts TCP connections and runs the SSH protocol on each of
//! them with russh. Every connection gets its own [`SshHandler`] sharing the
//! server's [`SessionServices`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │ Incoming        │───▶│ SshServer        │───▶│ SshHandler       │
//! │ Connections     │    │ (accept loop)    │    │ (one per client) │
//! └─────────────────┘    └──────────────────┘    └────────┬─────────┘
//!                                                         │
//!                                                ┌────────▼─────────┐
//!                                                │ SessionLifecycle │
//!                                                └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sshcast::network::ssh_server::SshServer;
//! use sshcast::session_management::lifecycle::SessionServices;
//! use sshcast::error_handling::types::NetworkError;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn serve(services: Arc<SessionServices>) -> Result<(), NetworkError> {
//!     let host_key = SshServer::load_host_key("/etc/ssh/ssh_host_ed25519_key")?;
//!     let server = SshServer::new("0.0.0.0:2222".parse().unwrap(), host_key, services);
//!     server.run(CancellationToken::new()).await
//! }
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use russh::keys::PrivateKey;
use russh::server::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error_handling::types::NetworkError;
use crate::session_management::lifecycle::SessionServices;

use super::ssh_handler::{method_set, SshHandler};

/// Delay before answering a rejected authentication attempt.
const AUTH_REJECTION_TIME: Duration = Duration::from_secs(1);

/// The SSH front end of the recorder.
///
/// `SshServer` is responsible for:
/// - Holding the russh configuration (host key, offered auth methods)
/// - Binding the listening socket
/// - Running one SSH session task per accepted connection until shutdown
pub struct SshServer {
    listen_address: SocketAddr,
    config: Arc<Config>,
    services: Arc<SessionServices>,
}

impl SshServer {
    /// Creates a new `SshServer`.
    ///
    /// # Arguments
    ///
    /// * `listen_address` - Address the listening socket is bound to
    /// * `host_key` - Private key identifying the server to clients
    /// * `services` - Backends shared by every session
    pub fn new(
        listen_address: SocketAddr,
        host_key: PrivateKey,
        services: Arc<SessionServices>,
    ) -> Self {
        let config = Config {
            methods: method_set(&services.auth.methods()),
            auth_rejection_time: AUTH_REJECTION_TIME,
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            keys: vec![host_key],
            ..Default::default()
        };
        Self {
            listen_address,
            config: Arc::new(config),
            services,
        }
    }

    /// Loads an unencrypted OpenSSH private key to use as host key.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::HostKeyError` when the file cannot be read or
    /// decoded.
    pub fn load_host_key<P: AsRef<Path>>(path: P) -> Result<PrivateKey, NetworkError> {
        let path = path.as_ref();
        russh::keys::load_secret_key(path, None).map_err(|e| {
            error!("Failed to load host key {}: {}", path.display(), e);
            NetworkError::HostKeyError(format!("{}: {}", path.display(), e))
        })
    }

    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Binds the listening socket.
    pub async fn bind(&self) -> Result<TcpListener, NetworkError> {
        let listener = TcpListener::bind(self.listen_address)
            .await
            .map_err(NetworkError::BindError)?;
        info!("Listening for SSH connections on {}", self.listen_address);
        Ok(listener)
    }

    /// Binds and serves until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), NetworkError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accepts connections from `listener` until `shutdown` is cancelled.
    ///
    /// Sessions already running are left alone; stopping them is up to the
    /// session manager.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), NetworkError> {
        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("No longer accepting SSH connections");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let handler = SshHandler::new(peer_addr, Arc::clone(&self.services));
            let session_id = handler.session_id();
            let config = Arc::clone(&self.config);
            info!("[{}] Connection from {}", session_id, peer_addr);

            tokio::spawn(async move {
                match russh::server::run_stream(config, stream, handler).await {
                    Ok(session) => match session.await {
                        Ok(()) => debug!("[{}] Connection closed", session_id),
                        Err(e) => debug!("[{}] Connection ended: {}", session_id, e),
                    },
                    Err(e) => warn!("[{}] SSH handshake failed: {}", session_id, e),
                }
            });
        }
    }
}
