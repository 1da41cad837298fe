//! POSIX pipes built on Unix domain socket pairs.
//!
//! Socket pairs rather than `pipe(2)` so writes can suppress `SIGPIPE`
//! per call (`MSG_NOSIGNAL` on Linux, `SO_NOSIGPIPE` elsewhere) instead
//! of the parent having to change its global signal disposition.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::error::{Error, Result};

use super::Ready;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// One endpoint of a byte channel. Dropping it closes the descriptor
/// exactly once.
#[derive(Debug)]
pub(crate) struct Pipe(OwnedFd);

impl Pipe {
    /// Creates a connected `(read, write)` pair with close-on-exec set
    /// atomically where the OS supports it.
    pub(crate) fn pair() -> Result<(Pipe, Pipe)> {
        let mut fds = [-1 as libc::c_int; 2];

        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            let r = unsafe {
                libc::socketpair(
                    libc::AF_UNIX,
                    libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                    0,
                    fds.as_mut_ptr(),
                )
            };
            if r < 0 {
                return Err(Error::last_os());
            }
        }

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let r = unsafe {
                libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr())
            };
            if r < 0 {
                return Err(Error::last_os());
            }

            // No atomic `SOCK_CLOEXEC` here: set the flag immediately,
            // accepting the narrowed race window, and keep writes from
            // raising `SIGPIPE` at the socket level.
            for &fd in &fds {
                let enable: libc::c_int = 1;
                let r = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
                let r = if r < 0 {
                    r
                } else {
                    unsafe {
                        libc::setsockopt(
                            fd,
                            libc::SOL_SOCKET,
                            libc::SO_NOSIGPIPE,
                            (&enable as *const libc::c_int).cast(),
                            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                        )
                    }
                };
                if r < 0 {
                    let error = Error::last_os();
                    unsafe {
                        libc::close(fds[0]);
                        libc::close(fds[1]);
                    }
                    return Err(error);
                }
            }
        }

        // SAFETY: `socketpair` succeeded, so both descriptors are valid
        // and exclusively ours.
        let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        Ok((Pipe(read), Pipe(write)))
    }

    /// Reads once, blocking until data arrives or the peer closes.
    ///
    /// A closed peer is reported as [`Error::BrokenPipe`], never as a
    /// zero-byte success.
    pub(crate) fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        let n = unsafe {
            libc::read(
                self.0.as_raw_fd(),
                buffer.as_mut_ptr().cast(),
                buffer.len(),
            )
        };
        if n < 0 {
            return Err(Error::last_os());
        }
        if n == 0 {
            return Err(Error::BrokenPipe);
        }
        Ok(n as usize)
    }

    /// Waits up to `timeout` for the pipe to accept data, then writes
    /// once. A closed read end yields [`Error::BrokenPipe`] without
    /// raising `SIGPIPE`.
    pub(crate) fn write(&self, buffer: &[u8], timeout: Option<Duration>) -> Result<usize> {
        let fd = self.0.as_raw_fd();

        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLOUT,
            revents: 0,
        };
        let r = unsafe { libc::poll(&mut pollfd, 1, poll_millis(timeout)) };
        if r < 0 {
            return Err(Error::last_os());
        }
        if r == 0 {
            return Err(Error::TimedOut);
        }

        let n = unsafe { libc::send(fd, buffer.as_ptr().cast(), buffer.len(), SEND_FLAGS) };
        if n < 0 {
            return Err(Error::last_os());
        }
        Ok(n as usize)
    }

    /// Returns the first of `out`/`err` that is readable, errored or hung
    /// up. With neither pipe present there is nothing left to wait on and
    /// the result is [`Error::BrokenPipe`].
    pub(crate) fn wait(
        out: Option<&Pipe>,
        err: Option<&Pipe>,
        timeout: Option<Duration>,
    ) -> Result<Ready> {
        let template = libc::pollfd {
            fd: -1,
            events: libc::POLLIN,
            revents: 0,
        };
        let mut fds = [template; 2];
        let mut tags = [Ready::Out; 2];
        let mut count = 0;

        for (pipe, tag) in [(out, Ready::Out), (err, Ready::Err)] {
            if let Some(pipe) = pipe {
                fds[count].fd = pipe.0.as_raw_fd();
                tags[count] = tag;
                count += 1;
            }
        }

        if count == 0 {
            return Err(Error::BrokenPipe);
        }

        let r = unsafe { libc::poll(fds.as_mut_ptr(), count as libc::nfds_t, poll_millis(timeout)) };
        if r < 0 {
            return Err(Error::last_os());
        }
        if r == 0 {
            return Err(Error::TimedOut);
        }

        for i in 0..count {
            // A hangup counts as readiness: the subsequent read reports
            // the closure.
            if fds[i].revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0 {
                return Ok(tags[i]);
            }
        }

        Err(Error::BrokenPipe)
    }

    /// Transfers ownership of the descriptor to the caller.
    pub(crate) fn into_inner(self) -> OwnedFd {
        self.0
    }
}

impl AsRawFd for Pipe {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

fn poll_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(timeout) => timeout.as_millis().try_into().unwrap_or(libc::c_int::MAX),
    }
}
