//! Unidirectional byte channels between parent and child.
//!
//! A [`Pipe`] owns exactly one endpoint. Endpoints are created
//! close-on-exec (POSIX) or non-inheritable (Windows) so unrelated
//! children never see them; the redirect resolver re-enables inheritance
//! on the single handle the child is meant to receive.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use unix::Pipe;
#[cfg(windows)]
pub(crate) use windows::Pipe;

/// Which output pipe a readiness wait selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Ready {
    Out,
    Err,
}
