//! Process-wide initialization shared by every engine.
//!
//! Windows needs Winsock brought up before the first spawn and torn down
//! after the last teardown, so a crate-global refcount pairs the first
//! successful `init` with the last `deinit`. POSIX has no global state
//! and both calls are no-ops.

#[cfg(windows)]
mod imp {
    use std::mem::MaybeUninit;
    use std::sync::Mutex;

    use windows_sys::Win32::Networking::WinSock::{WSACleanup, WSAStartup, WSADATA};

    use crate::error::{Error, Result};

    /// Number of live engines holding the global state.
    static REFCOUNT: Mutex<usize> = Mutex::new(0);

    pub(crate) fn init() -> Result<()> {
        let mut count = REFCOUNT.lock().unwrap();
        if *count == 0 {
            let mut data = MaybeUninit::<WSADATA>::uninit();
            // 0x0202 requests Winsock 2.2.
            let r = unsafe { WSAStartup(0x0202, data.as_mut_ptr()) };
            if r != 0 {
                return Err(Error::from_os(r));
            }
        }
        *count += 1;
        Ok(())
    }

    pub(crate) fn deinit() {
        let mut count = REFCOUNT.lock().unwrap();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            unsafe {
                WSACleanup();
            }
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use crate::error::Result;

    pub(crate) fn init() -> Result<()> {
        Ok(())
    }

    pub(crate) fn deinit() {}
}

pub(crate) use imp::{deinit, init};
