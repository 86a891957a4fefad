//! Pty allocation and shell spawning.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::pin::Pin;
use std::process::Stdio;
use std::task::{ready, Context, Poll};

use log::{debug, info};
use nix::libc;
use nix::pty::{openpty, Winsize};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, Command};

use crate::auth::types::Identity;
use crate::error_handling::types::SessionError;

use super::session::{PtyRequest, WindowSize};

/// A shell attached to the slave side of a freshly allocated pty.
pub struct PtyProcess {
    pub child: Child,
    /// Master side of the pty; the parent's slave copy is already closed.
    pub master: File,
}

fn to_winsize(size: WindowSize) -> Winsize {
    Winsize {
        ws_row: u16::try_from(size.rows).unwrap_or(u16::MAX),
        ws_col: u16::try_from(size.cols).unwrap_or(u16::MAX),
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// Starts `identity`'s shell on a new pty sized after `request`.
///
/// The child runs as the identity's uid/gid in its own session with the pty
/// as controlling terminal, and is killed if the returned handle is dropped
/// before it exits.
pub fn spawn_shell(identity: &Identity, request: &PtyRequest) -> Result<PtyProcess, SessionError> {
    let winsize = to_winsize(request.size);
    let pty = openpty(Some(&winsize), None)
        .map_err(|e| SessionError::PtyStartFailed(format!("openpty: {}", e)))?;
    let slave: OwnedFd = pty.slave;

    let stdio = |fd: &OwnedFd| -> Result<Stdio, SessionError> {
        fd.try_clone()
            .map(Stdio::from)
            .map_err(|e| SessionError::PtyStartFailed(format!("dup pty slave: {}", e)))
    };

    let mut cmd = Command::new(&identity.shell);
    cmd.env("TERM", &request.term)
        .env("HOME", &identity.home)
        .env("USER", &identity.name)
        .env("LOGNAME", &identity.name)
        .env("SHELL", &identity.shell)
        .uid(identity.uid)
        .gid(identity.gid)
        .stdin(stdio(&slave)?)
        .stdout(stdio(&slave)?)
        .stderr(stdio(&slave)?)
        .kill_on_drop(true);
    if identity.home.is_dir() {
        cmd.current_dir(&identity.home);
    }

    // Safety: only async-signal-safe calls between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|e| {
        SessionError::PtyStartFailed(format!("spawn {}: {}", identity.shell, e))
    })?;
    drop(slave);

    info!(
        "Started {} for {} (uid {}, gid {}, pid {:?}) on a {}x{} {} pty",
        identity.shell,
        identity.name,
        identity.uid,
        identity.gid,
        child.id(),
        request.size.cols,
        request.size.rows,
        request.term
    );

    Ok(PtyProcess {
        child,
        master: File::from(pty.master),
    })
}

/// Applies a new window size to the pty behind `master`.
pub fn set_winsize<F: AsRawFd>(master: &F, size: WindowSize) -> io::Result<()> {
    let winsize = to_winsize(size);
    // Safety: TIOCSWINSZ reads a winsize struct that outlives the call.
    let ret = unsafe {
        libc::ioctl(
            master.as_raw_fd(),
            libc::TIOCSWINSZ,
            &winsize as *const Winsize,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    debug!("pty resized to {}x{}", size.cols, size.rows);
    Ok(())
}

/// Reads the current window size of the pty behind `master`.
pub fn get_winsize<F: AsRawFd>(master: &F) -> io::Result<WindowSize> {
    let mut winsize = to_winsize(WindowSize::new(0, 0));
    // Safety: TIOCGWINSZ fills the winsize struct passed by pointer.
    let ret = unsafe {
        libc::ioctl(
            master.as_raw_fd(),
            libc::TIOCGWINSZ,
            &mut winsize as *mut Winsize,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(WindowSize::new(winsize.ws_col as u32, winsize.ws_row as u32))
}

fn set_nonblocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // Safety: F_GETFL/F_SETFL only touch the status flags of an fd we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Non-blocking handle on a pty master, driven by the tokio reactor.
///
/// Nothing runs on the blocking pool: dropping a pending read releases the
/// descriptor at once, even while some process still holds the slave open.
pub struct AsyncPty {
    inner: AsyncFd<File>,
}

impl AsyncPty {
    pub fn new(file: File) -> io::Result<Self> {
        set_nonblocking(&file)?;
        Ok(Self {
            inner: AsyncFd::new(file)?,
        })
    }
}

impl AsyncRead for AsyncPty {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(unfilled)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for AsyncPty {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_write_ready(cx))?;
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.write(buf)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Exit code reported for a finished child: its own code, or 128 plus the
/// signal that killed it.
pub fn exit_code(status: std::process::ExitStatus) -> u32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code as u32,
        (None, Some(signal)) => 128 + signal as u32,
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(3 << 8)), 3);
        // Killed by SIGKILL.
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(9)), 137);
    }

    #[test]
    fn test_winsize_roundtrip_on_real_pty() {
        let pty = openpty(Some(&to_winsize(WindowSize::new(80, 24))), None).unwrap();
        let master = File::from(pty.master);
        assert_eq!(get_winsize(&master).unwrap(), WindowSize::new(80, 24));

        set_winsize(&master, WindowSize::new(132, 43)).unwrap();
        assert_eq!(get_winsize(&master).unwrap(), WindowSize::new(132, 43));
    }

    #[tokio::test]
    async fn test_async_pty_relays_both_ways() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let pty = openpty(Some(&to_winsize(WindowSize::new(80, 24))), None).unwrap();
        let mut master = AsyncPty::new(File::from(pty.master)).unwrap();
        let mut slave = File::from(pty.slave);

        slave.write_all(b"from-slave").unwrap();
        let mut buf = [0u8; 64];
        let n = master.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("from-slave"));

        // The slave is in canonical mode, so input arrives line by line.
        master.write_all(b"x\n").await.unwrap();
        let mut line = [0u8; 2];
        slave.read_exact(&mut line).unwrap();
        assert_eq!(&line, b"x\n");
    }

    #[tokio::test]
    async fn test_aborted_read_releases_the_master() {
        use tokio::io::AsyncReadExt;

        let pty = openpty(Some(&to_winsize(WindowSize::new(80, 24))), None).unwrap();
        let mut master = AsyncPty::new(File::from(pty.master)).unwrap();
        let mut slave = File::from(pty.slave);
        set_nonblocking(&slave).unwrap();

        // The slave stays open, so this read never completes on its own.
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let _ = master.read(&mut buf).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // With the master still open, an idle slave has nothing to read.
        let mut buf = [0u8; 8];
        let idle = slave.read(&mut buf).unwrap_err();
        assert_eq!(idle.kind(), io::ErrorKind::WouldBlock);

        reader.abort();
        let _ = reader.await;

        // Once the master is closed the slave is hung up instead.
        match slave.read(&mut buf) {
            Ok(n) => assert_eq!(n, 0),
            Err(e) => assert_ne!(e.kind(), io::ErrorKind::WouldBlock),
        }
    }

    #[test]
    fn test_oversized_dimensions_are_clamped() {
        let ws = to_winsize(WindowSize::new(100_000, 50));
        assert_eq!(ws.ws_col, u16::MAX);
        assert_eq!(ws.ws_row, 50);
    }
}
