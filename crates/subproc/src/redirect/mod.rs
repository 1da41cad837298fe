//! Resolution of per-stream redirection modes into OS handles.
//!
//! Each of the three standard streams resolves to a parent-side endpoint
//! (only for [`Redirect::Pipe`]) and a child-side handle that the spawn
//! installs on fd 0/1/2. Child-side handles are closed in the parent
//! after the spawn, success or failure.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use unix::ChildEnd;
#[cfg(windows)]
pub(crate) use windows::ChildEnd;

#[cfg(unix)]
use unix as sys;
#[cfg(windows)]
use windows as sys;

use crate::error::{Error, Result};
use crate::options::{Redirect, Stream};
use crate::pipe::Pipe;

/// The three child-side handles handed to the spawn.
#[derive(Debug)]
pub(crate) struct ChildEnds {
    pub(crate) stdin: ChildEnd,
    pub(crate) stdout: ChildEnd,
    pub(crate) stderr: ChildEnd,
}

/// Resolves one redirection mode for `stream` into the parent endpoint to
/// keep and the child handle to install.
pub(crate) fn resolve(stream: Stream, mode: &Redirect) -> Result<(Option<Pipe>, ChildEnd)> {
    match mode {
        Redirect::Pipe => {
            let (read, write) = Pipe::pair()?;
            let (parent, child) = match stream {
                Stream::In => (write, read),
                Stream::Out | Stream::Err => (read, write),
            };
            let child = sys::into_child_end(child)?;
            Ok((Some(parent), child))
        }
        Redirect::Inherit => match sys::dup_parent(stream) {
            Ok(child) => Ok((None, child)),
            // The parent's own stream is closed; fall back to the null
            // device.
            Err(Error::BrokenPipe) => Ok((None, sys::open_null(stream)?)),
            Err(error) => Err(error),
        },
        Redirect::Discard => Ok((None, sys::open_null(stream)?)),
        Redirect::Path(path) => Ok((None, sys::open_path(stream, path)?)),
    }
}
