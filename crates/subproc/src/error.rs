//! Error taxonomy shared by every operation in the crate.

use std::io;

/// Errors returned by process and pipe operations.
///
/// The taxonomy is deliberately small: every OS failure that has no
/// dedicated variant is carried verbatim in [`Error::System`] so callers
/// can still diagnose it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A caller violated a precondition, such as an empty `argv`, a
    /// conflicting option combination or an operation on a process that
    /// was never started.
    #[error("invalid argument")]
    InvalidArgument,
    /// A bounded operation expired before completing.
    #[error("operation timed out")]
    TimedOut,
    /// The relevant stream is closed, or was never opened as a pipe.
    #[error("broken pipe")]
    BrokenPipe,
    /// The OS reported an allocation failure.
    #[error("out of memory")]
    NoMemory,
    /// The exit status was requested before the child exited.
    #[error("child is still running")]
    InProgress,
    /// Any other OS failure, carrying the raw error code.
    #[error("{}", io::Error::from_raw_os_error(*.0))]
    System(i32),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Captures the calling thread's last OS error.
    pub(crate) fn last_os() -> Self {
        match io::Error::last_os_error().raw_os_error() {
            Some(code) => Self::from_os(code),
            None => Error::System(0),
        }
    }

    /// Maps a raw errno value onto the taxonomy.
    #[cfg(unix)]
    pub(crate) fn from_os(code: i32) -> Self {
        match code {
            libc::EPIPE | libc::ECONNRESET => Error::BrokenPipe,
            libc::ETIMEDOUT => Error::TimedOut,
            libc::ENOMEM => Error::NoMemory,
            libc::EINVAL => Error::InvalidArgument,
            _ => Error::System(code),
        }
    }

    /// Maps a `GetLastError` value onto the taxonomy.
    #[cfg(windows)]
    pub(crate) fn from_os(code: i32) -> Self {
        use windows_sys::Win32::Foundation::{
            ERROR_BROKEN_PIPE, ERROR_INVALID_PARAMETER, ERROR_NOT_ENOUGH_MEMORY, ERROR_NO_DATA,
            ERROR_OUTOFMEMORY, WAIT_TIMEOUT,
        };

        match code as u32 {
            ERROR_BROKEN_PIPE | ERROR_NO_DATA => Error::BrokenPipe,
            WAIT_TIMEOUT => Error::TimedOut,
            ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY => Error::NoMemory,
            ERROR_INVALID_PARAMETER => Error::InvalidArgument,
            _ => Error::System(code),
        }
    }

    /// Returns the raw OS error code, if this error carries one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::System(code) => Some(*code),
            _ => None,
        }
    }
}
