//! Spawn-time configuration for a child process.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Identifies one of the three standard streams of a child process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Standard input. Also the tag of the synthetic flush call at the
    /// start of [`crate::Process::drain`].
    In,
    /// Standard output.
    Out,
    /// Standard error.
    Err,
}

/// How one standard stream of the child is redirected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Redirect {
    /// Connect the stream to the parent through a pipe. The default.
    #[default]
    Pipe,
    /// Let the child share the parent's corresponding stream.
    ///
    /// Downgrades to [`Redirect::Discard`] when the parent's stream is
    /// itself closed.
    Inherit,
    /// Connect the stream to the OS null device.
    Discard,
    /// Connect the stream to a file: opened for reading when redirecting
    /// stdin, created and appended to when redirecting stdout or stderr.
    Path(PathBuf),
}

/// Redirections for the three standard streams.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Redirects {
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub stderr: Redirect,
}

/// A time bound for [`crate::Process::wait`] and the stop ladder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Timeout {
    /// Wait indefinitely.
    #[default]
    Infinite,
    /// Substitute whatever is left of the whole-process deadline. With no
    /// deadline configured this is equivalent to [`Timeout::Infinite`].
    Deadline,
    /// Wait at most this long. A zero duration only polls.
    Finite(Duration),
}

/// One rung of the stop ladder: an optional signal followed by a bounded
/// wait.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Stop {
    /// Skip this slot.
    #[default]
    Noop,
    /// Wait for the child to exit on its own.
    Wait(Timeout),
    /// Send `SIGTERM` (POSIX) or `CTRL_BREAK_EVENT` (Windows), then wait.
    Terminate(Timeout),
    /// Send `SIGKILL` (POSIX) or call `TerminateProcess` (Windows), then
    /// wait.
    Kill(Timeout),
}

/// Up to three stop actions applied in order by [`crate::Process::stop`]
/// and replayed by the destructor while the child is still running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StopActions {
    pub first: Stop,
    pub second: Stop,
    pub third: Stop,
}

impl StopActions {
    fn is_noop(&self) -> bool {
        self.first == Stop::Noop && self.second == Stop::Noop && self.third == Stop::Noop
    }

    /// The plan remembered at start: an all-noop plan becomes "wait out
    /// the deadline, then terminate and wait forever".
    pub(crate) fn or_default(self) -> Self {
        if self.is_noop() {
            StopActions {
                first: Stop::Wait(Timeout::Deadline),
                second: Stop::Terminate(Timeout::Infinite),
                third: Stop::Noop,
            }
        } else {
            self
        }
    }
}

/// Options consumed by [`crate::Process::start`].
///
/// This is plain data with a [`Default`] that pipes all three streams,
/// inherits the environment and applies no time bounds.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// `NAME=VALUE` entries for the child's environment. `None` inherits
    /// the parent's environment.
    pub environment: Option<Vec<String>>,
    /// Working directory for the child. A relative program path is
    /// resolved against the parent's working directory before the child
    /// changes into this one, so `(relative program, custom directory)`
    /// behaves the same on every platform.
    pub working_directory: Option<PathBuf>,
    /// Per-stream redirections.
    pub redirect: Redirects,
    /// Shorthand that sets all three redirections to
    /// [`Redirect::Inherit`]. Exclusive with explicit redirections and
    /// with `discard`.
    pub inherit: bool,
    /// Shorthand that sets all three redirections to
    /// [`Redirect::Discard`]. Exclusive with explicit redirections and
    /// with `inherit`.
    pub discard: bool,
    /// Bytes written to the child's stdin before the child starts.
    /// Requires the default piped stdin, which is closed after the
    /// write.
    pub input: Option<Vec<u8>>,
    /// Stop ladder remembered for [`crate::Process::stop`]-on-drop.
    pub stop: StopActions,
    /// Default per-call bound for reads and writes. `None` waits
    /// indefinitely; a zero duration turns every read and write into a
    /// non-blocking check.
    pub timeout: Option<Duration>,
    /// Whole-process deadline, measured from `start`. Once it expires,
    /// every bounded operation on the process reports a timeout.
    pub deadline: Option<Duration>,
    /// POSIX only: fork without executing a program. `start` returns in
    /// both processes, with `argv` required to be empty.
    pub fork: bool,
}

impl Options {
    /// Rejects conflicting combinations and expands the `inherit` and
    /// `discard` shorthands into per-stream modes.
    pub(crate) fn validate(&mut self, argc: usize) -> Result<()> {
        let explicit = self.redirect != Redirects::default();

        if explicit && (self.inherit || self.discard) {
            return Err(Error::InvalidArgument);
        }

        if self.inherit && self.discard {
            return Err(Error::InvalidArgument);
        }

        if self.inherit {
            self.redirect = Redirects {
                stdin: Redirect::Inherit,
                stdout: Redirect::Inherit,
                stderr: Redirect::Inherit,
            };
        }

        if self.discard {
            self.redirect = Redirects {
                stdin: Redirect::Discard,
                stdout: Redirect::Discard,
                stderr: Redirect::Discard,
            };
        }

        if let Some(input) = &self.input {
            if input.is_empty() || self.redirect.stdin != Redirect::Pipe {
                return Err(Error::InvalidArgument);
            }
        }

        if self.fork {
            if argc != 0 {
                return Err(Error::InvalidArgument);
            }
        } else if argc == 0 {
            return Err(Error::InvalidArgument);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthands_are_mutually_exclusive() {
        let mut options = Options {
            inherit: true,
            discard: true,
            ..Options::default()
        };
        assert_eq!(options.validate(1), Err(Error::InvalidArgument));
    }

    #[test]
    fn shorthand_conflicts_with_explicit_redirect() {
        let mut options = Options {
            inherit: true,
            ..Options::default()
        };
        options.redirect.stdout = Redirect::Discard;
        assert_eq!(options.validate(1), Err(Error::InvalidArgument));
    }

    #[test]
    fn inherit_expands_to_all_streams() {
        let mut options = Options {
            inherit: true,
            ..Options::default()
        };
        options.validate(1).expect("valid");
        assert_eq!(options.redirect.stdin, Redirect::Inherit);
        assert_eq!(options.redirect.stdout, Redirect::Inherit);
        assert_eq!(options.redirect.stderr, Redirect::Inherit);
    }

    #[test]
    fn input_requires_a_piped_stdin() {
        let mut options = Options {
            input: Some(b"ping".to_vec()),
            ..Options::default()
        };
        options.redirect.stdin = Redirect::Discard;
        assert_eq!(options.validate(1), Err(Error::InvalidArgument));
    }

    #[test]
    fn empty_argv_requires_fork() {
        assert_eq!(Options::default().validate(0), Err(Error::InvalidArgument));

        let mut forked = Options {
            fork: true,
            ..Options::default()
        };
        assert_eq!(forked.validate(1), Err(Error::InvalidArgument));
        forked.validate(0).expect("fork without argv is valid");
    }

    #[test]
    fn noop_plan_gets_the_default_ladder() {
        let plan = StopActions::default().or_default();
        assert_eq!(plan.first, Stop::Wait(Timeout::Deadline));
        assert_eq!(plan.second, Stop::Terminate(Timeout::Infinite));
        assert_eq!(plan.third, Stop::Noop);

        let explicit = StopActions {
            first: Stop::Kill(Timeout::Infinite),
            ..StopActions::default()
        };
        assert_eq!(explicit.or_default(), explicit);
    }
}
