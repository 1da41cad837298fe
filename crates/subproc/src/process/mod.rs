//! Child process lifecycle: spawn, stream I/O, bounded waits and the
//! stop ladder.
//!
//! # Overview
//!
//! A [`Process`] owns one child and the parent-side endpoints of its
//! redirected standard streams. It moves through three states:
//! [`Status::NotStarted`] → [`Status::Running`] → [`Status::Exited`].
//! Every blocking operation is bounded by the per-call timeout and the
//! whole-process deadline from [`Options`], combined with `min`.
//!
//! Reading stdout and stderr goes through a single readiness wait, so one
//! thread can consume both streams without the child's pipe buffers
//! filling up and deadlocking it. [`Process::drain`] packages that loop.
//!
//! Dropping a process whose child is still running replays the stop plan
//! remembered at start (by default: wait out the deadline, then terminate
//! and wait), so a child is reaped however the parent exits.
//!
//! # Examples
//!
//! Run a program and capture its output:
//!
//! ```no_run
//! use subproc::{Options, Process, Timeout};
//!
//! # fn example() -> subproc::Result<()> {
//! let mut process = Process::new();
//! process.start(&["cmake", "--help"], Options::default())?;
//!
//! let mut output = String::new();
//! process.drain(
//!     |_, chunk| {
//!         output.push_str(&String::from_utf8_lossy(chunk));
//!         true
//!     },
//!     |_, _| true,
//! )?;
//!
//! let status = process.wait(Timeout::Infinite)?;
//! println!("exited with {status}: {output}");
//! # Ok(())
//! # }
//! ```

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as sys;
#[cfg(windows)]
use windows as sys;

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::clock;
use crate::error::{Error, Result};
use crate::init;
use crate::options::{Options, Stop, StopActions, Stream, Timeout};
use crate::pipe::{Pipe, Ready};
use crate::redirect::{self, ChildEnds};

/// Exit status reported when the child was killed by `SIGKILL`.
///
/// Statuses 0..=255 are normal exits; death by signal `n` is encoded as
/// `256 + n` so the two ranges cannot collide. On Windows the child's own
/// exit code is reported verbatim instead.
pub const EXIT_SIGKILL: i32 = 256 + 9;

/// Exit status reported when the child was terminated by `SIGTERM`.
pub const EXIT_SIGTERM: i32 = 256 + 15;

/// Lifecycle state of a [`Process`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// `start` has not been called, or the last `start` failed.
    NotStarted,
    /// The child has been spawned and not yet reaped.
    Running,
    /// The child has been reaped; its exit status is cached.
    Exited(i32),
    /// This is the child side of a fork-mode start; the process object
    /// is inert here.
    InChild,
}

/// Which side of a fork-mode [`Process::start`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fork {
    Parent,
    Child,
}

/// A child process and the parent-side endpoints of its standard
/// streams.
///
/// Operations take `&mut self` and are meant to be driven from one
/// thread; the concurrency lives in the child and the kernel pipes in
/// between.
pub struct Process {
    child: Option<sys::Child>,
    stdin: Option<Pipe>,
    stdout: Option<Pipe>,
    stderr: Option<Pipe>,
    status: Status,
    stop: StopActions,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    owns_init: bool,
}

impl Process {
    /// Creates a process in [`Status::NotStarted`] without touching the
    /// OS.
    pub fn new() -> Self {
        Self {
            child: None,
            stdin: None,
            stdout: None,
            stderr: None,
            status: Status::NotStarted,
            stop: StopActions::default(),
            timeout: None,
            deadline: None,
            owns_init: false,
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> Status {
        self.status
    }

    /// OS process id of the running child.
    pub fn pid(&self) -> Result<u32> {
        match (&self.child, self.status) {
            (Some(child), Status::Running) => Ok(child.pid()),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// The cached exit status, or [`Error::InProgress`] while the child
    /// is still running.
    pub fn exit_status(&self) -> Result<i32> {
        match self.status {
            Status::Exited(code) => Ok(code),
            Status::Running => Err(Error::InProgress),
            Status::NotStarted | Status::InChild => Err(Error::InvalidArgument),
        }
    }

    /// Spawns `argv` with the given options.
    ///
    /// `argv[0]` is the program, resolved through the OS's executable
    /// search unless it contains a path separator. A process can be
    /// started at most once; on failure every provisional resource is
    /// released and the process returns to [`Status::NotStarted`].
    ///
    /// The return value distinguishes the two sides of a fork-mode start
    /// and is always [`Fork::Parent`] otherwise.
    pub fn start<S: AsRef<str>>(&mut self, argv: &[S], mut options: Options) -> Result<Fork> {
        if self.status != Status::NotStarted {
            return Err(Error::InvalidArgument);
        }

        options.validate(argv.len())?;

        #[cfg(windows)]
        if options.fork {
            return Err(Error::InvalidArgument);
        }

        init::init()?;
        self.owns_init = true;

        match self.start_inner(argv, &options) {
            Ok(fork) => Ok(fork),
            Err(error) => {
                self.release();
                self.status = Status::NotStarted;
                Err(error)
            }
        }
    }

    fn start_inner<S: AsRef<str>>(&mut self, argv: &[S], options: &Options) -> Result<Fork> {
        let (stdin, stdin_child) = redirect::resolve(Stream::In, &options.redirect.stdin)?;
        self.stdin = stdin;
        let (stdout, stdout_child) = redirect::resolve(Stream::Out, &options.redirect.stdout)?;
        self.stdout = stdout;
        let (stderr, stderr_child) = redirect::resolve(Stream::Err, &options.redirect.stderr)?;
        self.stderr = stderr;

        // Initial input goes into the pipe before the child exists; the
        // kernel buffer holds it until the child starts reading.
        if let Some(input) = &options.input {
            let stdin = self.stdin.as_ref().ok_or(Error::BrokenPipe)?;
            let mut written = 0;
            while written < input.len() {
                written += stdin.write(&input[written..], None)?;
            }
            self.stdin = None;
        }

        let argv: Vec<String> = argv.iter().map(|arg| arg.as_ref().to_owned()).collect();
        #[cfg(unix)]
        let argv = fixup_relative_program(argv, options.working_directory.as_deref())?;

        let spawn_options = sys::SpawnOptions {
            environment: options.environment.as_deref(),
            working_directory: options.working_directory.as_deref(),
            exec: !options.fork,
        };
        let ends = ChildEnds {
            stdin: stdin_child,
            stdout: stdout_child,
            stderr: stderr_child,
        };

        match sys::spawn(&argv, &spawn_options, ends)? {
            sys::Spawned::InChild => {
                // The child side owns nothing: its streams live on fds
                // 0/1/2 now.
                self.stdin = None;
                self.stdout = None;
                self.stderr = None;
                self.status = Status::InChild;
                Ok(Fork::Child)
            }
            sys::Spawned::Parent(child) => {
                trace!(pid = child.pid(), ?argv, "child started");
                self.child = Some(child);
                self.status = Status::Running;
                self.stop = options.stop.or_default();
                self.timeout = options.timeout;
                self.deadline = clock::deadline_after(options.deadline);
                Ok(Fork::Parent)
            }
        }
    }

    /// Reads from the first of stdout/stderr with data available.
    ///
    /// The stream tag is only reported together with bytes actually
    /// transferred: a stream that hangs up during the wait is closed
    /// internally and the wait repeats on the survivor. Once both output
    /// streams are gone the result is [`Error::BrokenPipe`].
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<(Stream, usize)> {
        if self.status == Status::InChild || buffer.is_empty() {
            return Err(Error::InvalidArgument);
        }

        loop {
            let timeout = clock::effective(self.timeout, self.deadline);
            if timeout == Some(Duration::ZERO) {
                return Err(Error::TimedOut);
            }

            let ready = Pipe::wait(self.stdout.as_ref(), self.stderr.as_ref(), timeout)?;
            let pipe = match ready {
                Ready::Out => self.stdout.as_ref(),
                Ready::Err => self.stderr.as_ref(),
            };
            let Some(pipe) = pipe else {
                return Err(Error::BrokenPipe);
            };

            match pipe.read(buffer) {
                Ok(n) => {
                    let stream = match ready {
                        Ready::Out => Stream::Out,
                        Ready::Err => Stream::Err,
                    };
                    return Ok((stream, n));
                }
                // The selected stream hung up: drop its endpoint and
                // reselect.
                Err(Error::BrokenPipe) => match ready {
                    Ready::Out => self.stdout = None,
                    Ready::Err => self.stderr = None,
                },
                Err(error) => return Err(error),
            }
        }
    }

    /// Writes once to the child's stdin, returning the number of bytes
    /// accepted. Callers that need the whole buffer delivered loop until
    /// it is exhausted.
    ///
    /// An empty buffer is a no-op returning 0. A broken pipe closes the
    /// stdin endpoint before the error is surfaced.
    pub fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        if self.status == Status::InChild {
            return Err(Error::InvalidArgument);
        }
        if buffer.is_empty() {
            return Ok(0);
        }

        let Some(stdin) = self.stdin.as_ref() else {
            return Err(Error::BrokenPipe);
        };

        let timeout = clock::effective(self.timeout, self.deadline);
        if timeout == Some(Duration::ZERO) {
            return Err(Error::TimedOut);
        }

        match stdin.write(buffer, timeout) {
            Err(Error::BrokenPipe) => {
                self.stdin = None;
                Err(Error::BrokenPipe)
            }
            outcome => outcome,
        }
    }

    /// Closes the parent's endpoint of `stream`. Closing an absent or
    /// already-closed endpoint is a no-op.
    pub fn close(&mut self, stream: Stream) {
        match stream {
            Stream::In => self.stdin = None,
            Stream::Out => self.stdout = None,
            Stream::Err => self.stderr = None,
        }
    }

    /// Waits up to `timeout` for the child to exit and returns its exit
    /// status.
    ///
    /// A child that was already reaped returns the cached status
    /// immediately. [`Timeout::Deadline`] substitutes whatever is left of
    /// the whole-process deadline. On expiry the child is left waitable.
    pub fn wait(&mut self, timeout: Timeout) -> Result<i32> {
        match self.status {
            Status::NotStarted | Status::InChild => return Err(Error::InvalidArgument),
            Status::Exited(code) => return Ok(code),
            Status::Running => {}
        }

        let bound = match timeout {
            Timeout::Infinite => None,
            Timeout::Finite(timeout) => Some(timeout),
            Timeout::Deadline => clock::remaining(self.deadline),
        };

        let child = self.child.as_ref().ok_or(Error::InvalidArgument)?;
        let code = child.wait(bound)?;
        debug!(code, "child exited");
        self.status = Status::Exited(code);
        Ok(code)
    }

    /// Asks the child to exit: `SIGTERM` on POSIX, `CTRL_BREAK_EVENT` on
    /// Windows. Returns without waiting.
    ///
    /// A no-op once the child has been reaped; process ids are recycled,
    /// so a reaped child is never signalled.
    pub fn terminate(&mut self) -> Result<()> {
        match self.status {
            Status::NotStarted | Status::InChild => Err(Error::InvalidArgument),
            Status::Exited(_) => Ok(()),
            Status::Running => {
                let child = self.child.as_ref().ok_or(Error::InvalidArgument)?;
                child.terminate()
            }
        }
    }

    /// Forcibly ends the child: `SIGKILL` on POSIX, `TerminateProcess` on
    /// Windows. Returns without waiting; the same reaped-child rules as
    /// [`Process::terminate`] apply.
    pub fn kill(&mut self) -> Result<()> {
        match self.status {
            Status::NotStarted | Status::InChild => Err(Error::InvalidArgument),
            Status::Exited(_) => Ok(()),
            Status::Running => {
                let child = self.child.as_ref().ok_or(Error::InvalidArgument)?;
                child.kill()
            }
        }
    }

    /// Applies up to three stop actions in order, returning the child's
    /// exit status once one of them succeeds.
    ///
    /// Each non-noop action optionally signals the child and then waits
    /// with that action's timeout; the ladder only continues past a rung
    /// on [`Error::TimedOut`].
    pub fn stop(&mut self, actions: StopActions) -> Result<i32> {
        if matches!(self.status, Status::NotStarted | Status::InChild) {
            return Err(Error::InvalidArgument);
        }

        // An all-noop ladder has nothing to report.
        let mut outcome = Err(Error::InvalidArgument);

        for action in [actions.first, actions.second, actions.third] {
            let timeout = match action {
                Stop::Noop => continue,
                Stop::Wait(timeout) => timeout,
                Stop::Terminate(timeout) => {
                    self.terminate()?;
                    timeout
                }
                Stop::Kill(timeout) => {
                    self.kill()?;
                    timeout
                }
            };

            debug!(?action, "stop ladder");
            outcome = self.wait(timeout);
            match outcome {
                Err(Error::TimedOut) => continue,
                _ => break,
            }
        }

        outcome
    }

    /// Reads both output streams to completion, dispatching each chunk to
    /// its stream's sink.
    ///
    /// Both sinks are first called once with an empty chunk tagged
    /// [`Stream::In`], giving line or frame parsers a chance to flush
    /// state held over from a previous drain. The loop ends when a sink
    /// returns `false` or when both streams close; end-of-stream is
    /// success here, not [`Error::BrokenPipe`] — this is the one place
    /// that mapping happens. A consumer that needs to observe the
    /// closure itself should loop over [`Process::read`] instead.
    pub fn drain<O, E>(&mut self, mut out: O, mut err: E) -> Result<()>
    where
        O: FnMut(Stream, &[u8]) -> bool,
        E: FnMut(Stream, &[u8]) -> bool,
    {
        if !out(Stream::In, &[]) || !err(Stream::In, &[]) {
            return Ok(());
        }

        let mut buffer = [0u8; 4096];

        loop {
            let (stream, n) = match self.read(&mut buffer) {
                Ok(read) => read,
                Err(Error::BrokenPipe) => return Ok(()),
                Err(error) => return Err(error),
            };

            let more = match stream {
                Stream::Out => out(stream, &buffer[..n]),
                Stream::Err => err(stream, &buffer[..n]),
                Stream::In => true,
            };
            if !more {
                return Ok(());
            }
        }
    }

    fn release(&mut self) {
        self.child = None;
        self.stdin = None;
        self.stdout = None;
        self.stderr = None;
        self.deadline = None;
        if self.owns_init {
            init::deinit();
            self.owns_init = false;
        }
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.status == Status::Running {
            // Destruction must not fail; whatever the stop plan reports
            // is swallowed.
            let plan = self.stop;
            let _ = self.stop(plan);
        }
        self.release();
    }
}

/// A relative program combined with a custom working directory would be
/// resolved against the directory the child just changed into; anchoring
/// it to the parent's working directory first gives every platform the
/// same behavior.
#[cfg(unix)]
fn fixup_relative_program(
    mut argv: Vec<String>,
    working_directory: Option<&std::path::Path>,
) -> Result<Vec<String>> {
    if working_directory.is_none() {
        return Ok(argv);
    }
    let Some(program) = argv.first() else {
        return Ok(argv);
    };
    // Plain names keep going through the PATH search.
    if program.starts_with('/') || !program.contains('/') {
        return Ok(argv);
    }

    let cwd = std::env::current_dir()
        .map_err(|error| Error::from_os(error.raw_os_error().unwrap_or(0)))?;
    argv[0] = cwd.join(&argv[0]).to_string_lossy().into_owned();
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_process_is_inert() {
        let mut process = Process::new();
        assert_eq!(process.status(), Status::NotStarted);
        assert_eq!(process.pid(), Err(Error::InvalidArgument));
        assert_eq!(process.exit_status(), Err(Error::InvalidArgument));
        assert_eq!(process.wait(Timeout::Infinite), Err(Error::InvalidArgument));
        assert_eq!(process.terminate(), Err(Error::InvalidArgument));
        assert_eq!(process.kill(), Err(Error::InvalidArgument));
    }

    #[test]
    fn empty_argv_is_rejected() {
        let mut process = Process::new();
        let argv: [&str; 0] = [];
        assert_eq!(
            process.start(&argv, Options::default()),
            Err(Error::InvalidArgument)
        );
        assert_eq!(process.status(), Status::NotStarted);
    }

    #[test]
    #[cfg(unix)]
    fn fixup_anchors_relative_programs() {
        let cwd = std::env::current_dir().expect("cwd");
        let argv = vec!["helpers/echo".to_string()];
        let fixed =
            fixup_relative_program(argv, Some(std::path::Path::new("/tmp"))).expect("fixup");
        assert_eq!(fixed[0], cwd.join("helpers/echo").to_string_lossy());

        // Plain names and absolute paths pass through untouched.
        let plain = fixup_relative_program(
            vec!["cat".to_string()],
            Some(std::path::Path::new("/tmp")),
        )
        .expect("fixup");
        assert_eq!(plain[0], "cat");

        let absolute = fixup_relative_program(
            vec!["/bin/cat".to_string()],
            Some(std::path::Path::new("/tmp")),
        )
        .expect("fixup");
        assert_eq!(absolute[0], "/bin/cat");
    }
}
