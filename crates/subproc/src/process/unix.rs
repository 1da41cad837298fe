//! POSIX process primitives: fork/exec with the error-pipe handshake,
//! `SIGCHLD`-gated waits and signal delivery.
//!
//! The error pipe is what makes spawning atomic from the parent's point
//! of view: its write end is close-on-exec, so a successful `exec` turns
//! into EOF on the read end, while any pre-exec failure arrives as the
//! child's errno.

use std::ffi::CString;
use std::io;
use std::mem::{self, MaybeUninit};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::pipe::Pipe;
use crate::redirect::ChildEnds;

pub(crate) struct SpawnOptions<'a> {
    pub(crate) environment: Option<&'a [String]>,
    pub(crate) working_directory: Option<&'a Path>,
    /// `false` for fork-mode starts, which return in both processes
    /// without executing a program.
    pub(crate) exec: bool,
}

/// Which side of the spawn this process is on.
pub(crate) enum Spawned {
    Parent(Child),
    InChild,
}

/// Identifier of a spawned child process.
#[derive(Debug)]
pub(crate) struct Child {
    pid: libc::pid_t,
}

/// Upper bound on a single `SIGCHLD` sleep. A process-directed `SIGCHLD`
/// can be delivered to a thread that does not block it and be discarded,
/// so a lost signal may stall the wait by at most one quantum before the
/// child is polled again.
const SIGCHLD_QUANTUM: Duration = Duration::from_millis(100);

pub(crate) fn spawn(
    argv: &[String],
    options: &SpawnOptions<'_>,
    stdio: ChildEnds,
) -> Result<Spawned> {
    // Everything the child touches between `fork` and `exec` is prepared
    // up front; the child itself only issues raw system calls.
    let argv_owned = to_cstrings(argv)?;
    let mut argv_ptrs: Vec<*mut libc::c_char> = argv_owned
        .iter()
        .map(|arg| arg.as_ptr() as *mut libc::c_char)
        .collect();
    argv_ptrs.push(ptr::null_mut());

    let environment_owned = match options.environment {
        Some(environment) => Some(to_cstrings(environment)?),
        None => None,
    };
    let environment_ptrs = environment_owned.as_ref().map(|environment| {
        let mut ptrs: Vec<*mut libc::c_char> = environment
            .iter()
            .map(|entry| entry.as_ptr() as *mut libc::c_char)
            .collect();
        ptrs.push(ptr::null_mut());
        ptrs
    });

    let working_directory = match options.working_directory {
        Some(path) => {
            Some(CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::InvalidArgument)?)
        }
        None => None,
    };

    let (error_read, error_write) = Pipe::pair()?;
    let error_write_fd = error_write.as_raw_fd();
    let stdio_fds = [
        stdio.stdin.as_raw_fd(),
        stdio.stdout.as_raw_fd(),
        stdio.stderr.as_raw_fd(),
    ];

    // Block every signal across the fork so no parent handler runs in
    // the child before its handlers are reset.
    let mask = BlockedSignals::all()?;

    let pid = unsafe { libc::fork() };

    if pid == 0 {
        // Child. Failures report errno through the error pipe and exit;
        // nothing here allocates.
        unsafe {
            let r = reset_signals();
            if r != 0 {
                child_exit(error_write_fd, r);
            }

            if let Some(directory) = &working_directory {
                if libc::chdir(directory.as_ptr()) < 0 {
                    child_exit(error_write_fd, last_errno());
                }
            }

            for (fd, target) in stdio_fds.iter().zip(0..3) {
                if libc::dup2(*fd, target) < 0 {
                    child_exit(error_write_fd, last_errno());
                }
            }

            if options.exec {
                // Close every descriptor the child should not inherit.
                // The error pipe stays open; close-on-exec shuts it at
                // the moment `exec` succeeds, which is exactly the
                // success signal the parent waits for.
                let max_fd = libc::sysconf(libc::_SC_OPEN_MAX);
                if max_fd < 0 {
                    child_exit(error_write_fd, last_errno());
                }
                for fd in 3..max_fd as RawFd {
                    if fd != error_write_fd {
                        libc::close(fd);
                    }
                }

                exec(
                    argv_ptrs[0],
                    argv_ptrs.as_ptr(),
                    environment_ptrs.as_ref().map(|ptrs| ptrs.as_ptr()),
                );
                child_exit(error_write_fd, last_errno());
            }
        }

        // Fork mode: stay in the library. The parent's signal mask must
        // not be restored over the freshly cleared one.
        mem::forget(mask);
        drop(error_write);
        drop(error_read);
        drop(stdio);
        return Ok(Spawned::InChild);
    }

    drop(mask);

    if pid < 0 {
        return Err(Error::last_os());
    }

    // Close our copy of the write end so EOF can arrive, then wait for
    // the child to report on its pre-exec phase.
    drop(error_write);

    let mut bytes = [0u8; mem::size_of::<libc::c_int>()];
    let outcome = loop {
        match error_read.read(&mut bytes) {
            Err(Error::System(code)) if code == libc::EINTR => continue,
            outcome => break outcome,
        }
    };
    drop(error_read);

    match outcome {
        // EOF: `exec` succeeded (or the fork-mode child closed its end).
        Err(Error::BrokenPipe) => Ok(Spawned::Parent(Child { pid })),
        Ok(n) => {
            // The child failed before `exec` and is exiting; reap it so
            // no zombie is left behind.
            unsafe {
                libc::waitpid(pid, ptr::null_mut(), 0);
            }
            let code = if n == bytes.len() {
                libc::c_int::from_ne_bytes(bytes)
            } else {
                libc::EIO
            };
            Err(Error::from_os(code))
        }
        Err(error) => {
            unsafe {
                libc::waitpid(pid, ptr::null_mut(), 0);
            }
            Err(error)
        }
    }
}

impl Child {
    pub(crate) fn pid(&self) -> u32 {
        self.pid as u32
    }

    /// Waits up to `timeout` for the child to exit, without reaping it on
    /// expiry.
    ///
    /// `SIGCHLD` is blocked before the `waitpid` check so a child exiting
    /// between the check and the sigwait leaves the signal pending
    /// instead of getting lost.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<i32> {
        let _blocked = BlockedSignals::sigchld()?;
        let started = Instant::now();

        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(status);
            }

            let remaining = match timeout {
                None => SIGCHLD_QUANTUM,
                Some(timeout) => {
                    let elapsed = started.elapsed();
                    if elapsed >= timeout {
                        return Err(Error::TimedOut);
                    }
                    (timeout - elapsed).min(SIGCHLD_QUANTUM)
                }
            };

            match wait_sigchld(remaining) {
                // Quantum expiry is not the caller's timeout; the loop
                // re-checks both.
                Ok(()) | Err(Error::TimedOut) => {}
                Err(error) => return Err(error),
            }
        }
    }

    fn try_wait(&self) -> Result<Option<i32>> {
        let mut status: libc::c_int = 0;
        let r = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
        if r < 0 {
            return Err(Error::last_os());
        }
        if r == 0 {
            return Ok(None);
        }
        Ok(Some(parse_exit_status(status)))
    }

    pub(crate) fn terminate(&self) -> Result<()> {
        signal(self.pid, libc::SIGTERM)
    }

    pub(crate) fn kill(&self) -> Result<()> {
        signal(self.pid, libc::SIGKILL)
    }
}

/// Normal exits map to 0..=255; death by signal `n` maps to `256 + n`.
fn parse_exit_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        return libc::WEXITSTATUS(status);
    }
    256 + libc::WTERMSIG(status)
}

fn signal(pid: libc::pid_t, signal: libc::c_int) -> Result<()> {
    if unsafe { libc::kill(pid, signal) } < 0 {
        return Err(Error::last_os());
    }
    Ok(())
}

fn to_cstrings(strings: &[String]) -> Result<Vec<CString>> {
    strings
        .iter()
        .map(|string| CString::new(string.as_str()).map_err(|_| Error::InvalidArgument))
        .collect()
}

fn last_errno() -> libc::c_int {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

fn empty_sigset() -> libc::sigset_t {
    let mut set = MaybeUninit::<libc::sigset_t>::zeroed();
    unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        set.assume_init()
    }
}

/// Restores the previous signal mask on drop.
struct BlockedSignals {
    old: libc::sigset_t,
}

impl BlockedSignals {
    fn all() -> Result<Self> {
        let mut new = MaybeUninit::<libc::sigset_t>::zeroed();
        unsafe {
            libc::sigfillset(new.as_mut_ptr());
        }
        Self::apply(unsafe { new.assume_init() })
    }

    fn sigchld() -> Result<Self> {
        let mut new = empty_sigset();
        unsafe {
            libc::sigaddset(&mut new, libc::SIGCHLD);
        }
        Self::apply(new)
    }

    fn apply(new: libc::sigset_t) -> Result<Self> {
        let mut old = empty_sigset();
        let r = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &new, &mut old) };
        if r != 0 {
            return Err(Error::from_os(r));
        }
        Ok(Self { old })
    }
}

impl Drop for BlockedSignals {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.old, ptr::null_mut());
        }
    }
}

/// Child-side signal hygiene: every handler back to `SIG_DFL`, then an
/// empty mask. Returns 0 or the failing errno.
unsafe fn reset_signals() -> libc::c_int {
    let mut action = MaybeUninit::<libc::sigaction>::zeroed().assume_init();
    action.sa_sigaction = libc::SIG_DFL;
    libc::sigemptyset(&mut action.sa_mask);

    for signal in 1..64 {
        // `SIGKILL`, `SIGSTOP` and numbers the platform reserves report
        // `EINVAL`; those handlers cannot change anyway.
        if libc::sigaction(signal, &action, ptr::null_mut()) < 0 && last_errno() != libc::EINVAL {
            return last_errno();
        }
    }

    let empty = empty_sigset();
    libc::pthread_sigmask(libc::SIG_SETMASK, &empty, ptr::null_mut())
}

/// Reports `errno` to the parent and exits. Only called in the child.
unsafe fn child_exit(error_write: RawFd, code: libc::c_int) -> ! {
    let bytes = code.to_ne_bytes();
    libc::write(
        error_write,
        bytes.as_ptr().cast(),
        mem::size_of::<libc::c_int>(),
    );
    libc::_exit(code);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn exec(
    program: *const libc::c_char,
    argv: *const *mut libc::c_char,
    environment: Option<*const *mut libc::c_char>,
) {
    match environment {
        Some(environment) => {
            libc::execvpe(program, argv.cast(), environment.cast());
        }
        None => {
            libc::execvp(program, argv.cast());
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn exec(
    program: *const libc::c_char,
    argv: *const *mut libc::c_char,
    environment: Option<*const *mut libc::c_char>,
) {
    match environment {
        // No `execvpe` outside Linux: with an explicit environment the
        // program is not searched on PATH.
        Some(environment) => {
            libc::execve(program, argv.cast(), environment.cast());
        }
        None => {
            libc::execvp(program, argv.cast());
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn wait_sigchld(timeout: Duration) -> Result<()> {
    let mut set = empty_sigset();
    unsafe {
        libc::sigaddset(&mut set, libc::SIGCHLD);
    }

    let timeout = timespec_from(timeout);
    let r = unsafe { libc::sigtimedwait(&set, ptr::null_mut(), &timeout) };

    if r < 0 {
        return match last_errno() {
            libc::EAGAIN => Err(Error::TimedOut),
            // Interrupted: go back and check the child again.
            libc::EINTR => Ok(()),
            code => Err(Error::from_os(code)),
        };
    }

    Ok(())
}

/// `sigtimedwait` does not exist on the BSD family; a throwaway kqueue
/// watching `EVFILT_SIGNAL` bounds the wait instead.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn wait_sigchld(timeout: Duration) -> Result<()> {
    let queue = unsafe { libc::kqueue() };
    if queue < 0 {
        return Err(Error::last_os());
    }

    let mut event: libc::kevent = unsafe { MaybeUninit::zeroed().assume_init() };
    event.ident = libc::SIGCHLD as usize;
    event.filter = libc::EVFILT_SIGNAL;
    event.flags = libc::EV_ADD;

    let timeout = timespec_from(timeout);

    let r = unsafe { libc::kevent(queue, &event, 1, &mut event, 1, &timeout) };

    let result = if r < 0 {
        Err(Error::last_os())
    } else if r == 0 {
        Err(Error::TimedOut)
    } else if event.flags & libc::EV_ERROR != 0 && event.data != 0 {
        Err(Error::from_os(event.data as i32))
    } else {
        Ok(())
    };

    unsafe {
        libc::close(queue);
    }

    result
}

fn timespec_from(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: duration.subsec_nanos() as _,
    }
}
