//! Windows pipes built on anonymous pipe handles.
//!
//! Anonymous pipes cannot be waited on with `WaitForMultipleObjects`, so
//! readiness is probed with `PeekNamedPipe` in a bounded loop; the sleep
//! quantum caps how far a timeout can overshoot.

use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::ptr;
use std::time::{Duration, Instant};

use windows_sys::Win32::Foundation::{GetLastError, ERROR_BROKEN_PIPE, HANDLE};
use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows_sys::Win32::System::Pipes::{CreatePipe, PeekNamedPipe};

use crate::error::{Error, Result};

use super::Ready;

const WAIT_QUANTUM: Duration = Duration::from_millis(4);

/// One endpoint of a byte channel. Dropping it closes the handle exactly
/// once.
#[derive(Debug)]
pub(crate) struct Pipe(OwnedHandle);

impl Pipe {
    /// Creates a connected `(read, write)` pair. Both handles start out
    /// non-inheritable; the redirect resolver re-enables inheritance on
    /// the child-facing end only.
    pub(crate) fn pair() -> Result<(Pipe, Pipe)> {
        let mut read: HANDLE = ptr::null_mut();
        let mut write: HANDLE = ptr::null_mut();

        if unsafe { CreatePipe(&mut read, &mut write, ptr::null(), 0) } == 0 {
            return Err(Error::last_os());
        }

        // SAFETY: `CreatePipe` succeeded, so both handles are valid and
        // exclusively ours.
        let read = unsafe { OwnedHandle::from_raw_handle(read as RawHandle) };
        let write = unsafe { OwnedHandle::from_raw_handle(write as RawHandle) };

        Ok((Pipe(read), Pipe(write)))
    }

    /// Reads once, blocking until data arrives or the peer closes.
    pub(crate) fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        let mut n: u32 = 0;
        let ok = unsafe {
            ReadFile(
                self.raw(),
                buffer.as_mut_ptr().cast(),
                buffer.len() as u32,
                &mut n,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(match unsafe { GetLastError() } {
                ERROR_BROKEN_PIPE => Error::BrokenPipe,
                code => Error::from_os(code as i32),
            });
        }
        if n == 0 {
            return Err(Error::BrokenPipe);
        }
        Ok(n as usize)
    }

    /// Writes once. Anonymous pipes expose no writability probe, so the
    /// write blocks until the kernel accepts the bytes regardless of
    /// `timeout`; a closed read end yields [`Error::BrokenPipe`].
    pub(crate) fn write(&self, buffer: &[u8], _timeout: Option<Duration>) -> Result<usize> {
        let mut n: u32 = 0;
        let ok = unsafe {
            WriteFile(
                self.raw(),
                buffer.as_ptr().cast(),
                buffer.len() as u32,
                &mut n,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(match unsafe { GetLastError() } {
                ERROR_BROKEN_PIPE => Error::BrokenPipe,
                code => Error::from_os(code as i32),
            });
        }
        Ok(n as usize)
    }

    /// Returns the first of `out`/`err` with data available or a broken
    /// peer. With neither pipe present there is nothing left to wait on
    /// and the result is [`Error::BrokenPipe`].
    pub(crate) fn wait(
        out: Option<&Pipe>,
        err: Option<&Pipe>,
        timeout: Option<Duration>,
    ) -> Result<Ready> {
        if out.is_none() && err.is_none() {
            return Err(Error::BrokenPipe);
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            for (pipe, tag) in [(out, Ready::Out), (err, Ready::Err)] {
                let Some(pipe) = pipe else {
                    continue;
                };

                let mut available: u32 = 0;
                let ok = unsafe {
                    PeekNamedPipe(
                        pipe.raw(),
                        ptr::null_mut(),
                        0,
                        ptr::null_mut(),
                        &mut available,
                        ptr::null_mut(),
                    )
                };
                if ok == 0 {
                    // A broken pipe is a readiness event: the subsequent
                    // read reports the closure.
                    return match unsafe { GetLastError() } {
                        ERROR_BROKEN_PIPE => Ok(tag),
                        code => Err(Error::from_os(code as i32)),
                    };
                }
                if available > 0 {
                    return Ok(tag);
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::TimedOut);
                }
            }

            std::thread::sleep(WAIT_QUANTUM);
        }
    }

    /// Transfers ownership of the handle to the caller.
    pub(crate) fn into_inner(self) -> OwnedHandle {
        self.0
    }

    fn raw(&self) -> HANDLE {
        self.0.as_raw_handle() as HANDLE
    }
}
