//! Cross-platform child process management with redirected standard
//! streams.
//!
//! # Overview
//!
//! The main types in this crate are:
//!
//! - [`Process`]: one child process, its parent-side pipes and its
//!   lifecycle state
//! - [`Options`]: spawn-time configuration (redirections, environment,
//!   timeouts, the stop ladder)
//! - [`Redirect`]: what each standard stream connects to
//! - [`Stop`] / [`StopActions`]: the graceful-stop ladder
//! - [`Error`]: the crate's small, POSIX-flavored error taxonomy
//!
//! Reads from the child multiplex stdout and stderr through a single
//! readiness wait, so one thread can keep both pipes drained without
//! deadlocking the child. Every blocking operation is bounded by a
//! per-call timeout and a whole-process deadline, and dropping a
//! [`Process`] replays its stop plan so no child outlives its parent
//! unreaped.
//!
//! # Examples
//!
//! Feed a child input and read back what it writes:
//!
//! ```no_run
//! use subproc::{Options, Process, Stream, Timeout};
//!
//! fn main() -> subproc::Result<()> {
//!     let mut process = Process::new();
//!     process.start(&["cat"], Options::default())?;
//!
//!     process.write(b"hello\n")?;
//!     process.close(Stream::In);
//!
//!     let mut output = String::new();
//!     process.drain(
//!         |_, chunk| {
//!             output.push_str(&String::from_utf8_lossy(chunk));
//!             true
//!         },
//!         |_, _| true,
//!     )?;
//!
//!     let status = process.wait(Timeout::Infinite)?;
//!     assert_eq!(status, 0);
//!     assert_eq!(output, "hello\n");
//!     Ok(())
//! }
//! ```

mod clock;
mod error;
mod init;
mod options;
mod pipe;
mod process;
mod redirect;

pub use error::{Error, Result};
pub use options::{Options, Redirect, Redirects, Stop, StopActions, Stream, Timeout};
pub use process::{Fork, Process, Status, EXIT_SIGKILL, EXIT_SIGTERM};
