//! Windows redirection handles.

use std::fs::OpenOptions;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::path::Path;
use std::ptr;

use windows_sys::Win32::Foundation::{
    DuplicateHandle, SetHandleInformation, DUPLICATE_SAME_ACCESS, HANDLE, HANDLE_FLAG_INHERIT,
    INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::System::Console::{
    GetStdHandle, STD_ERROR_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows_sys::Win32::System::Threading::GetCurrentProcess;

use crate::error::{Error, Result};
use crate::options::Stream;
use crate::pipe::Pipe;

pub(crate) type ChildEnd = OwnedHandle;

/// Marks a handle inheritable so `CreateProcessW` can pass it to the
/// child through the handle list.
fn mark_inheritable(handle: &OwnedHandle) -> Result<()> {
    let raw = handle.as_raw_handle() as HANDLE;
    if unsafe { SetHandleInformation(raw, HANDLE_FLAG_INHERIT, HANDLE_FLAG_INHERIT) } == 0 {
        return Err(Error::last_os());
    }
    Ok(())
}

pub(super) fn into_child_end(pipe: Pipe) -> Result<ChildEnd> {
    let handle = pipe.into_inner();
    mark_inheritable(&handle)?;
    Ok(handle)
}

/// Duplicates the parent's standard handle for the child. A missing
/// parent handle reports [`Error::BrokenPipe`] so the caller can
/// downgrade.
pub(super) fn dup_parent(stream: Stream) -> Result<ChildEnd> {
    let id = match stream {
        Stream::In => STD_INPUT_HANDLE,
        Stream::Out => STD_OUTPUT_HANDLE,
        Stream::Err => STD_ERROR_HANDLE,
    };

    let parent = unsafe { GetStdHandle(id) };
    if parent.is_null() || parent == INVALID_HANDLE_VALUE {
        return Err(Error::BrokenPipe);
    }

    let process = unsafe { GetCurrentProcess() };
    let mut duplicated: HANDLE = ptr::null_mut();
    let ok = unsafe {
        DuplicateHandle(
            process,
            parent,
            process,
            &mut duplicated,
            0,
            1, // inheritable
            DUPLICATE_SAME_ACCESS,
        )
    };
    if ok == 0 {
        return Err(Error::last_os());
    }

    // SAFETY: `DuplicateHandle` produced a fresh handle that we own.
    Ok(unsafe { OwnedHandle::from_raw_handle(duplicated as RawHandle) })
}

pub(super) fn open_null(stream: Stream) -> Result<ChildEnd> {
    open_path(stream, Path::new("NUL"))
}

pub(super) fn open_path(stream: Stream, path: &Path) -> Result<ChildEnd> {
    let file = match stream {
        Stream::In => OpenOptions::new().read(true).open(path),
        Stream::Out | Stream::Err => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path),
    };

    let handle = match file {
        Ok(file) => OwnedHandle::from(file),
        Err(error) => return Err(Error::from_os(error.raw_os_error().unwrap_or(0))),
    };
    mark_inheritable(&handle)?;
    Ok(handle)
}
