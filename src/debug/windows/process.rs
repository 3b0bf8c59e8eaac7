//! Process and thread handles using Windows API.

use windows::core::Result;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use windows::Win32::System::Threading::{
    OpenProcess, OpenThread, PROCESS_ACCESS_RIGHTS, THREAD_ACCESS_RIGHTS,
};

/// Handle closed on drop
pub(super) struct OwnedHandle(pub(super) HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

pub(super) fn open_process(access: PROCESS_ACCESS_RIGHTS, pid: u32) -> Result<OwnedHandle> {
    let handle = unsafe { OpenProcess(access, false, pid)? };
    Ok(OwnedHandle(handle))
}

pub(super) fn open_thread(access: THREAD_ACCESS_RIGHTS, tid: u32) -> Result<OwnedHandle> {
    let handle = unsafe { OpenThread(access, false, tid)? };
    Ok(OwnedHandle(handle))
}

/// Enumerate the thread ids owned by `pid`
pub(super) fn enumerate_threads(pid: u32) -> Result<Vec<u32>> {
    let mut threads = Vec::new();

    unsafe {
        let snapshot = OwnedHandle(CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0)?);
        let mut entry = THREADENTRY32 {
            dwSize: std::mem::size_of::<THREADENTRY32>() as u32,
            ..Default::default()
        };

        if Thread32First(snapshot.0, &mut entry).is_err() {
            return Ok(threads);
        }

        loop {
            if entry.th32OwnerProcessID == pid {
                threads.push(entry.th32ThreadID);
            }
            if Thread32Next(snapshot.0, &mut entry).is_err() {
                break;
            }
        }
    }

    Ok(threads)
}
