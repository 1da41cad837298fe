//! Windows process primitives: `CreateProcessW` with an explicit handle
//! list, bounded waits and console signals.

use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::path::Path;
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
use windows_sys::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, TerminateProcess, UpdateProcThreadAttribute,
    WaitForSingleObject, CREATE_NEW_PROCESS_GROUP, CREATE_UNICODE_ENVIRONMENT,
    EXTENDED_STARTUPINFO_PRESENT, INFINITE, PROCESS_INFORMATION,
    PROC_THREAD_ATTRIBUTE_HANDLE_LIST, STARTF_USESTDHANDLES, STARTUPINFOEXW,
};

use crate::error::{Error, Result};
use crate::redirect::ChildEnds;

pub(crate) struct SpawnOptions<'a> {
    pub(crate) environment: Option<&'a [String]>,
    pub(crate) working_directory: Option<&'a Path>,
    /// Fork-mode starts do not exist on Windows; the engine rejects them
    /// before getting here.
    pub(crate) exec: bool,
}

pub(crate) enum Spawned {
    Parent(Child),
    #[allow(dead_code)]
    InChild,
}

/// Identifier of a spawned child process: the id for console signals,
/// the handle for waits and hard kills.
#[derive(Debug)]
pub(crate) struct Child {
    pid: u32,
    handle: OwnedHandle,
}

pub(crate) fn spawn(
    argv: &[String],
    options: &SpawnOptions<'_>,
    stdio: ChildEnds,
) -> Result<Spawned> {
    debug_assert!(options.exec);

    let mut command_line = build_command_line(argv)?;
    let mut environment = match options.environment {
        Some(environment) => Some(environment_block(environment)?),
        None => None,
    };
    let working_directory = options.working_directory.map(wide_path);

    // Inheritance on Windows is all-or-nothing per handle; the attribute
    // list narrows it to exactly the three standard handles.
    let mut handles: [HANDLE; 3] = [
        stdio.stdin.as_raw_handle() as HANDLE,
        stdio.stdout.as_raw_handle() as HANDLE,
        stdio.stderr.as_raw_handle() as HANDLE,
    ];

    let mut size: usize = 0;
    unsafe {
        // First call only reports the required buffer size.
        InitializeProcThreadAttributeList(ptr::null_mut(), 1, 0, &mut size);
    }
    let mut attributes = vec![0u8; size];
    if unsafe { InitializeProcThreadAttributeList(attributes.as_mut_ptr().cast(), 1, 0, &mut size) }
        == 0
    {
        return Err(Error::last_os());
    }

    let list = AttributeList {
        data: attributes.as_mut_ptr().cast(),
    };

    let ok = unsafe {
        UpdateProcThreadAttribute(
            list.data,
            0,
            PROC_THREAD_ATTRIBUTE_HANDLE_LIST as usize,
            handles.as_mut_ptr().cast(),
            mem::size_of::<[HANDLE; 3]>(),
            ptr::null_mut(),
            ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(Error::last_os());
    }

    let mut startup: STARTUPINFOEXW = unsafe { mem::zeroed() };
    startup.StartupInfo.cb = mem::size_of::<STARTUPINFOEXW>() as u32;
    startup.StartupInfo.dwFlags = STARTF_USESTDHANDLES;
    startup.StartupInfo.hStdInput = handles[0];
    startup.StartupInfo.hStdOutput = handles[1];
    startup.StartupInfo.hStdError = handles[2];
    startup.lpAttributeList = list.data;

    let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };

    // `CREATE_NEW_PROCESS_GROUP` so `CTRL_BREAK_EVENT` can later be
    // delivered to this child alone.
    let flags =
        CREATE_UNICODE_ENVIRONMENT | EXTENDED_STARTUPINFO_PRESENT | CREATE_NEW_PROCESS_GROUP;

    let ok = unsafe {
        CreateProcessW(
            ptr::null(),
            command_line.as_mut_ptr(),
            ptr::null(),
            ptr::null(),
            1, // inherit the listed handles
            flags,
            environment
                .as_mut()
                .map_or(ptr::null(), |environment| environment.as_ptr().cast()),
            working_directory
                .as_ref()
                .map_or(ptr::null(), |directory| directory.as_ptr()),
            &startup.StartupInfo,
            &mut info,
        )
    };
    if ok == 0 {
        return Err(Error::last_os());
    }

    unsafe {
        CloseHandle(info.hThread);
    }

    // SAFETY: `CreateProcessW` succeeded; ownership of the process
    // handle transfers to `Child`.
    let handle = unsafe { OwnedHandle::from_raw_handle(info.hProcess as RawHandle) };

    Ok(Spawned::Parent(Child {
        pid: info.dwProcessId,
        handle,
    }))
}

impl Child {
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Waits up to `timeout` for the child to exit.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<i32> {
        let millis = match timeout {
            None => INFINITE,
            Some(timeout) => timeout.as_millis().min(u128::from(INFINITE - 1)) as u32,
        };

        match unsafe { WaitForSingleObject(self.raw(), millis) } {
            WAIT_OBJECT_0 => {
                let mut code: u32 = 0;
                if unsafe { GetExitCodeProcess(self.raw(), &mut code) } == 0 {
                    return Err(Error::last_os());
                }
                Ok(code as i32)
            }
            WAIT_TIMEOUT => Err(Error::TimedOut),
            _ => Err(Error::last_os()),
        }
    }

    /// Sends `CTRL_BREAK_EVENT` to the child's process group.
    pub(crate) fn terminate(&self) -> Result<()> {
        if unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, self.pid) } == 0 {
            return Err(Error::last_os());
        }
        Ok(())
    }

    pub(crate) fn kill(&self) -> Result<()> {
        if unsafe { TerminateProcess(self.raw(), 1) } == 0 {
            return Err(Error::last_os());
        }
        Ok(())
    }

    fn raw(&self) -> HANDLE {
        self.handle.as_raw_handle() as HANDLE
    }
}

struct AttributeList {
    data: *mut core::ffi::c_void,
}

impl Drop for AttributeList {
    fn drop(&mut self) {
        unsafe {
            DeleteProcThreadAttributeList(self.data);
        }
    }
}

/// Joins `argv` into one command line following the C runtime's quoting
/// rules, so the child's own argument parsing reverses it exactly.
fn build_command_line(argv: &[String]) -> Result<Vec<u16>> {
    let mut line = String::new();

    for (i, argument) in argv.iter().enumerate() {
        if argument.contains('\0') {
            return Err(Error::InvalidArgument);
        }
        if i > 0 {
            line.push(' ');
        }
        append_quoted(argument, &mut line);
    }

    Ok(wide(&line))
}

fn append_quoted(argument: &str, line: &mut String) {
    let needs_quotes = argument.is_empty()
        || argument
            .chars()
            .any(|ch| matches!(ch, ' ' | '\t' | '\n' | '\x0b' | '"'));
    if !needs_quotes {
        line.push_str(argument);
        return;
    }

    line.push('"');
    let mut backslashes = 0usize;
    for ch in argument.chars() {
        if ch == '\\' {
            backslashes += 1;
        } else {
            if ch == '"' {
                // A quote needs every preceding backslash doubled plus
                // one more to escape the quote itself.
                for _ in 0..=backslashes {
                    line.push('\\');
                }
            }
            backslashes = 0;
        }
        line.push(ch);
    }
    // Trailing backslashes are doubled so the closing quote survives.
    for _ in 0..backslashes {
        line.push('\\');
    }
    line.push('"');
}

/// `NAME=VALUE` entries as the double-null-terminated UTF-16 block
/// `CreateProcessW` expects.
fn environment_block(environment: &[String]) -> Result<Vec<u16>> {
    let mut block = Vec::new();
    for entry in environment {
        if entry.contains('\0') {
            return Err(Error::InvalidArgument);
        }
        block.extend(entry.encode_utf16());
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    Ok(block)
}

fn wide(string: &str) -> Vec<u16> {
    string.encode_utf16().chain(std::iter::once(0)).collect()
}

fn wide_path(path: &Path) -> Vec<u16> {
    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quoted(argument: &str) -> String {
        let mut line = String::new();
        append_quoted(argument, &mut line);
        line
    }

    #[test]
    fn plain_arguments_stay_unquoted() {
        assert_eq!(quoted("cmake"), "cmake");
        assert_eq!(quoted("--help"), "--help");
    }

    #[test]
    fn whitespace_forces_quotes() {
        assert_eq!(quoted("a b"), "\"a b\"");
        assert_eq!(quoted(""), "\"\"");
    }

    #[test]
    fn quotes_and_backslashes_are_escaped() {
        assert_eq!(quoted("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quoted("ends with \\"), "\"ends with \\\\\"");
        // Backslashes alone force no quoting at all.
        assert_eq!(quoted("back\\slash"), "back\\slash");
    }

    #[test]
    fn environment_blocks_are_double_null_terminated() {
        let block = environment_block(&["A=1".to_string()]).expect("block");
        assert_eq!(block.last(), Some(&0));
        assert_eq!(block[block.len() - 2], 0);

        let empty = environment_block(&[]).expect("block");
        assert_eq!(empty, vec![0, 0]);
    }
}
