//! Relays and records the bytes of one running session.
//!
//! Two tapped pipes sit between the network stream and the pty master, one
//! per direction. Both taps feed the same [`Recorder`], which orders the
//! events of the two directions into one timeline:
//!
//! ```text
//! client -> input pipe  --tap--> log_input  -> pty
//! pty    -> output pipe --tap--> log_output -> client
//! ```
//!
//! The shell's exit is the authoritative end of a session. The end of the
//! client stream only closes the input pipe, so a client that half-closes
//! after sending its input still sees the shell finish. The shell is hung up
//! only when the session is cancelled, and the reported status is always the
//! one returned by waiting on the child.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::types::Identity;
use crate::data_capture::{Direction, InterceptPipe, PipeReader, PipeWriter, Recorder};
use crate::error_handling::types::{PipeError, SessionError};

use super::pty::{self, AsyncPty, PtyProcess};
use super::session::{PtyRequest, WindowSize};

const RELAY_BUFFER_SIZE: usize = 4096;

/// How long a hung-up shell gets to exit before it is killed.
const HANGUP_GRACE: Duration = Duration::from_secs(2);

pub struct SessionPump {
    session_id: Uuid,
    process: PtyProcess,
    drain_timeout: Duration,
}

impl SessionPump {
    /// Starts the shell for `identity` on a pty shaped after `pty`.
    ///
    /// Fails with [`SessionError::NoPtyRequested`] before allocating anything
    /// when the client never sent a pty request.
    pub fn start(
        session_id: Uuid,
        pty: Option<&PtyRequest>,
        identity: &Identity,
        drain_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let request = pty.ok_or(SessionError::NoPtyRequested)?;
        let process = pty::spawn_shell(identity, request)?;
        debug!("[{}] Shell started, pump ready", session_id);
        Ok(Self {
            session_id,
            process,
            drain_timeout,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.child.id()
    }

    /// Relays `stream` to and from the shell until the shell exits, and
    /// returns its exit code.
    ///
    /// Window sizes received on `resizes` are applied to the pty as they
    /// arrive. Cancelling `cancel` hangs up the shell.
    pub async fn run<S>(
        self,
        stream: S,
        mut resizes: mpsc::Receiver<WindowSize>,
        recorder: Arc<Recorder>,
        cancel: CancellationToken,
    ) -> Result<u32, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let SessionPump {
            session_id,
            process: PtyProcess { mut child, master },
            drain_timeout,
        } = self;

        let pty_reader = master
            .try_clone()
            .and_then(AsyncPty::new)
            .map_err(SessionError::ProcessError)?;
        let pty_writer = master
            .try_clone()
            .and_then(AsyncPty::new)
            .map_err(SessionError::ProcessError)?;
        let master = Arc::new(master);

        let recording = Arc::new(AtomicBool::new(true));
        let input = InterceptPipe::with_tap(record_tap(
            session_id,
            Arc::clone(&recorder),
            Arc::clone(&recording),
            Direction::Input,
        ));
        let output = InterceptPipe::with_tap(record_tap(
            session_id,
            Arc::clone(&recorder),
            Arc::clone(&recording),
            Direction::Output,
        ));

        let (net_reader, net_writer) = tokio::io::split(stream);

        let mut relays = JoinSet::new();
        relays.spawn(copy_into_pipe(session_id, "client", net_reader, input.writer()));
        relays.spawn(copy_from_pipe(session_id, "pty", input.reader(), pty_writer));
        relays.spawn(copy_into_pipe(session_id, "pty", pty_reader, output.writer()));
        let mut output_done =
            tokio::spawn(copy_from_pipe(session_id, "client", output.reader(), net_writer));

        let resize_master = Arc::clone(&master);
        let resize_task = tokio::spawn(async move {
            while let Some(size) = resizes.recv().await {
                if let Err(e) = pty::set_winsize(&*resize_master, size) {
                    warn!("[{}] Failed to resize pty: {}", session_id, e);
                }
            }
        });

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                info!("[{}] Session cancelled, hanging up shell", session_id);
                hang_up(session_id, &mut child).await
            }
        };

        // Give the shell's last output a chance to reach the client.
        if tokio::time::timeout(drain_timeout, &mut output_done)
            .await
            .is_err()
        {
            debug!(
                "[{}] Output not drained within {:?}",
                session_id, drain_timeout
            );
        }

        input.writer().close();
        output.writer().close();
        relays.shutdown().await;
        output_done.abort();
        resize_task.abort();
        drop(master);

        let status = status.map_err(SessionError::ProcessError)?;
        let code = pty::exit_code(status);
        info!("[{}] Shell exited with status {}", session_id, code);
        Ok(code)
    }
}

/// Sends SIGHUP to the shell, then SIGKILL if it is still alive after
/// [`HANGUP_GRACE`].
async fn hang_up(
    session_id: Uuid,
    child: &mut Child,
) -> std::io::Result<std::process::ExitStatus> {
    if let Some(pid) = child.id() {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGHUP) {
            debug!("[{}] SIGHUP to {} failed: {}", session_id, pid, e);
        }
    }
    match tokio::time::timeout(HANGUP_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("[{}] Shell ignored hangup, killing it", session_id);
            child.start_kill()?;
            child.wait().await
        }
    }
}

/// Builds the tap feeding one direction into the recorder. The first sink
/// failure stops recording for both directions; the shell keeps running.
fn record_tap(
    session_id: Uuid,
    recorder: Arc<Recorder>,
    enabled: Arc<AtomicBool>,
    direction: Direction,
) -> impl Fn(&[u8]) + Send + Sync + 'static {
    move |bytes: &[u8]| {
        if !enabled.load(Ordering::Acquire) {
            return;
        }
        let result = match direction {
            Direction::Input => recorder.log_input(bytes),
            Direction::Output => recorder.log_output(bytes),
        };
        if let Err(e) = result {
            if enabled.swap(false, Ordering::AcqRel) {
                error!(
                    "[{}] Recording stopped, session continues: {}",
                    session_id, e
                );
            }
        }
    }
}

fn is_pty_closed(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(nix::libc::EIO)
}

/// Copies `source` into the pipe until either ends. End of input closes the
/// pipe cleanly; a read error closes it with that error.
async fn copy_into_pipe<R>(session_id: Uuid, from: &'static str, mut source: R, pipe: PipeWriter)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; RELAY_BUFFER_SIZE];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => {
                debug!("[{}] {} reached end of stream", session_id, from);
                pipe.close();
                break;
            }
            Ok(n) => {
                let preview = &buf[..std::cmp::min(n, 64)];
                trace!(
                    "[{}] {} -> pipe {} bytes: {}{}",
                    session_id,
                    from,
                    n,
                    String::from_utf8_lossy(preview),
                    if n > 64 { " ..." } else { "" }
                );
                if let Err(e) = pipe.write(&buf[..n]).await {
                    debug!("[{}] pipe from {} closed: {}", session_id, from, e);
                    break;
                }
            }
            Err(e) if is_pty_closed(&e) => {
                debug!("[{}] {} closed", session_id, from);
                pipe.close();
                break;
            }
            Err(e) => {
                debug!("[{}] read from {} failed: {}", session_id, from, e);
                pipe.close_with_error(Some(PipeError::Closed(e.to_string())));
                break;
            }
        }
    }
}

/// Copies the pipe into `sink` until either ends. A write error closes the
/// pipe's read end so the writer on the other side is released.
async fn copy_from_pipe<W>(session_id: Uuid, to: &'static str, pipe: PipeReader, mut sink: W)
where
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; RELAY_BUFFER_SIZE];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => {
                let _ = sink.shutdown().await;
                break;
            }
            Ok(n) => {
                let written = async {
                    sink.write_all(&buf[..n]).await?;
                    sink.flush().await
                }
                .await;
                if let Err(e) = written {
                    debug!("[{}] write to {} failed: {}", session_id, to, e);
                    pipe.close_with_error(Some(PipeError::Closed(e.to_string())));
                    break;
                }
            }
            Err(e) => {
                debug!("[{}] pipe to {} closed: {}", session_id, to, e);
                let _ = sink.shutdown().await;
                break;
            }
        }
    }
}
