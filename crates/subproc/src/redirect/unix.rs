//! POSIX redirection handles.

use std::fs::OpenOptions;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::Path;

use crate::error::{Error, Result};
use crate::options::Stream;
use crate::pipe::Pipe;

pub(crate) type ChildEnd = OwnedFd;

pub(super) fn into_child_end(pipe: Pipe) -> Result<ChildEnd> {
    // `dup2` in the child clears close-on-exec on the installed copy, so
    // the endpoint can stay CLOEXEC here.
    Ok(pipe.into_inner())
}

/// Duplicates the parent's standard stream for the child. A closed parent
/// stream reports [`Error::BrokenPipe`] so the caller can downgrade.
pub(super) fn dup_parent(stream: Stream) -> Result<ChildEnd> {
    let fd = match stream {
        Stream::In => libc::STDIN_FILENO,
        Stream::Out => libc::STDOUT_FILENO,
        Stream::Err => libc::STDERR_FILENO,
    };

    let r = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if r < 0 {
        let error = std::io::Error::last_os_error();
        return Err(if error.raw_os_error() == Some(libc::EBADF) {
            Error::BrokenPipe
        } else {
            Error::from_os(error.raw_os_error().unwrap_or(0))
        });
    }

    // SAFETY: `fcntl` returned a fresh descriptor that we own.
    Ok(unsafe { OwnedFd::from_raw_fd(r) })
}

pub(super) fn open_null(stream: Stream) -> Result<ChildEnd> {
    let mode = match stream {
        Stream::In => libc::O_RDONLY,
        Stream::Out | Stream::Err => libc::O_WRONLY,
    };

    let fd = unsafe { libc::open(c"/dev/null".as_ptr(), mode | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(Error::last_os());
    }

    // SAFETY: `open` returned a fresh descriptor that we own.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub(super) fn open_path(stream: Stream, path: &Path) -> Result<ChildEnd> {
    // `OpenOptions` opens with `O_CLOEXEC` on every Unix.
    let file = match stream {
        Stream::In => OpenOptions::new().read(true).open(path),
        Stream::Out | Stream::Err => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path),
    };

    match file {
        Ok(file) => Ok(OwnedFd::from(file)),
        Err(error) => Err(Error::from_os(error.raw_os_error().unwrap_or(0))),
    }
}
