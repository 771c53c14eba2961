// Copyright (c) Dataplane Observability Team.
// SPDX-License-Identifier: Apache-2.0

//! The handoff socket: a `SOCK_SEQPACKET` UNIX-domain listener that hands every connecting
//! client one ancillary file descriptor for the segment, then closes the client socket. Follows
//! the same bind/permission/cleanup discipline as a plain request/response datagram socket,
//! generalized to `SCM_RIGHTS` fd passing because the payload here is a descriptor, not bytes.

use std::fs;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{
    accept, bind, connect as nix_connect, listen, sendmsg, setsockopt, socket, sockopt,
    AddressFamily, ControlMessage, MsgFlags, SockFlag, SockType, UnixAddr,
};
use nix::unistd::close;
use tracing::{info, warn};

use statseg_core::StatSegError;

/// Number of pending connections the kernel queues for us before `accept` must be called.
const LISTEN_BACKLOG: usize = 16;

/// How long `serve` sleeps between non-blocking `accept` attempts that find nothing waiting.
/// Keeps shutdown latency low without busy-looping on the socket.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A bound, listening handoff socket. Every accepted connection is handed `segment_fd` (a
/// descriptor the segment keeps open; this module never takes ownership of it) over `SCM_RIGHTS`
/// and then closed: one datagram per connection, then the server closes it.
pub struct HandoffListener {
    socket: RawFd,
    path: PathBuf,
}

impl HandoffListener {
    /// Bind a `SOCK_SEQPACKET` listener at `path`, removing any stale socket file left behind by
    /// a previous run first.
    pub fn bind(path: &Path) -> Result<Self, StatSegError> {
        remove_stale_socket(path)?;

        // Non-blocking so `serve` can poll `should_stop` between connections instead of being
        // stuck inside `accept` until a client happens to connect: the socket must be removed at
        // graceful shutdown, which requires this loop to actually notice a shutdown request.
        let fd = socket(
            AddressFamily::Unix,
            SockType::SeqPacket,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            None,
        )
        .map_err(|_| StatSegError::SegmentInit("failed to create handoff socket".into()))?;

        // Credentials passing lets a reader be identified by the kernel rather than trusting
        // anything it claims about itself, even though this listener does not yet act on the
        // credentials it receives.
        setsockopt(fd, sockopt::PassCred, &true)
            .map_err(|_| StatSegError::SegmentInit("failed to enable SO_PASSCRED".into()))?;

        let addr = UnixAddr::new(path)
            .map_err(|_| StatSegError::SegmentInit(format!("invalid socket path {path:?}")))?;
        bind(fd, &addr).map_err(|_| StatSegError::SegmentInit(format!("failed to bind {path:?}")))?;
        listen(fd, LISTEN_BACKLOG)
            .map_err(|_| StatSegError::SegmentInit("failed to listen on handoff socket".into()))?;

        // Group-write is permitted; this listener has no authentication of its own, so any local
        // process in the right group can request the segment fd.
        let permissions = fs::Permissions::from_mode(0o770);
        fs::set_permissions(path, permissions)
            .map_err(|e| StatSegError::SegmentInit(format!("failed to chmod {path:?}: {e}")))?;

        info!("handoff socket listening at {}", path.display());
        Ok(HandoffListener { socket: fd, path: path.to_path_buf() })
    }

    /// Accept connections and hand each one `segment_fd` until told to stop via `should_stop`.
    /// `should_stop` is polled between connections (accept itself cannot be interrupted
    /// cooperatively other than by a delivered signal, matched here by `accept` returning
    /// `EINTR`).
    pub fn serve(&self, segment_fd: RawFd, should_stop: impl Fn() -> bool) {
        while !should_stop() {
            match accept(self.socket) {
                Ok(client_fd) => {
                    if let Err(err) = send_fd(client_fd, segment_fd) {
                        warn!("failed to hand off segment fd to a client: {err}");
                    }
                    let _ = close(client_fd);
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                    continue;
                }
                Err(err) => {
                    warn!("accept on handoff socket failed: {err}");
                    break;
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for HandoffListener {
    fn drop(&mut self) {
        let _ = close(self.socket);
        let _ = fs::remove_file(&self.path);
    }
}

/// Send one `SCM_RIGHTS` datagram carrying `fd` over `client`, then the caller closes `client`.
fn send_fd(client: RawFd, fd: RawFd) -> nix::Result<()> {
    let fds = [fd];
    let cmsgs = [ControlMessage::ScmRights(&fds)];
    // The payload itself carries no information; the fd is the message. One zero byte keeps the
    // datagram non-empty so `recvmsg` on the client side has something to read alongside the
    // ancillary data.
    let iov = [std::io::IoSlice::new(&[0u8])];
    sendmsg::<UnixAddr>(client, &iov, &cmsgs, MsgFlags::empty(), None)?;
    Ok(())
}

fn remove_stale_socket(path: &Path) -> Result<(), StatSegError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            if !metadata.file_type().is_socket() {
                return Err(StatSegError::SegmentInit(format!(
                    "refusing to remove non-socket file at {path:?}"
                )));
            }
            fs::remove_file(path).map_err(|e| {
                StatSegError::SegmentInit(format!("failed to remove stale socket {path:?}: {e}"))
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StatSegError::SegmentInit(format!(
            "failed to stat socket path {path:?}: {e}"
        ))),
    }
}

/// Connect to a handoff listener at `path` and return the fd it hands over, for use by
/// `statsegd --dump` and by tests acting as an external reader.
pub fn request_segment_fd(path: &Path) -> Result<RawFd, StatSegError> {
    let client = socket(AddressFamily::Unix, SockType::SeqPacket, SockFlag::empty(), None)
        .map_err(|_| StatSegError::SegmentInit("failed to create client socket".into()))?;
    let addr = UnixAddr::new(path)
        .map_err(|_| StatSegError::SegmentInit(format!("invalid socket path {path:?}")))?;
    nix_connect(client, &addr)
        .map_err(|_| StatSegError::SegmentInit(format!("failed to connect to {path:?}")))?;

    let mut buf = [0u8; 1];
    let mut iov = [std::io::IoSliceMut::new(&mut buf)];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);
    let message = nix::sys::socket::recvmsg::<UnixAddr>(
        client,
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::empty(),
    )
    .map_err(|_| StatSegError::SegmentInit("failed to receive handoff message".into()))?;

    let mut received = None;
    for cmsg in message.cmsgs() {
        if let nix::sys::socket::ControlMessageOwned::ScmRights(fds) = cmsg {
            received = fds.first().copied();
        }
    }
    let _ = close(client);
    received.ok_or_else(|| StatSegError::SegmentInit("handoff message carried no fd".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn bind_creates_a_socket_file_with_group_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.sock");
        let listener = HandoffListener::bind(&path).unwrap();
        let metadata = fs::metadata(listener.path()).unwrap();
        assert!(metadata.file_type().is_socket());
        assert_eq!(metadata.permissions().mode() & 0o777, 0o770);
    }

    #[test]
    fn drop_removes_the_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.sock");
        let listener = HandoffListener::bind(&path).unwrap();
        drop(listener);
        assert!(!path.exists());
    }

    #[test]
    fn serve_hands_a_real_fd_to_one_connecting_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.sock");
        let listener = Arc::new(HandoffListener::bind(&path).unwrap());

        let segment_fd = nix::sys::memfd::memfd_create(
            "handoff-test",
            nix::sys::memfd::MemFdCreateFlag::empty(),
        )
        .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let server_listener = Arc::clone(&listener);
        let server_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            server_listener.serve(segment_fd, || server_stop.load(Ordering::Relaxed));
            let _ = close(segment_fd);
        });

        let received = request_segment_fd(&path).unwrap();
        assert!(received >= 0);
        let _ = close(received);

        stop.store(true, Ordering::Relaxed);
        // Unblock the accept loop with a throwaway connection so it observes `stop`.
        if let Ok(nudge) = socket(AddressFamily::Unix, SockType::SeqPacket, SockFlag::empty(), None) {
            let _ = nix_connect(nudge, &UnixAddr::new(&path).unwrap());
            let _ = close(nudge);
        }
        handle.join().unwrap();
    }
}
