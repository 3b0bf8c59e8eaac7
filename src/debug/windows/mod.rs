//! Windows-specific debuggee control using the Win32 thread API.

mod process;

use super::types::{GuestRegisters, SpawnedProcess};
use super::{DebuggeeError, ProcessControl};
use process::{enumerate_threads, open_process, open_thread};

use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, BOOL};
use windows::Win32::System::Threading::{
    CreateProcessW, IsWow64Process, ResumeThread, SuspendThread, TerminateProcess, CREATE_SUSPENDED,
    PROCESS_INFORMATION, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE, STARTUPINFOW,
    THREAD_GET_CONTEXT, THREAD_SUSPEND_RESUME,
};

#[cfg(target_arch = "x86_64")]
use windows::Win32::System::Diagnostics::Debug::{GetThreadContext, CONTEXT, CONTEXT_FULL_AMD64};

/// Windows process control
#[derive(Debug, Default)]
pub struct WindowsProcessControl;

impl WindowsProcessControl {
    pub fn new() -> Self {
        Self
    }
}

fn wide(text: &std::ffi::OsStr) -> Vec<u16> {
    text.encode_wide().chain(std::iter::once(0)).collect()
}

#[cfg(target_arch = "x86_64")]
#[repr(C, align(16))]
struct AlignedContext(CONTEXT);

impl ProcessControl for WindowsProcessControl {
    fn process_exists(&mut self, pid: u32) -> bool {
        pid != 0 && open_process(PROCESS_QUERY_LIMITED_INFORMATION, pid).is_ok()
    }

    fn list_threads(&mut self, pid: u32) -> Result<Vec<u32>, DebuggeeError> {
        Ok(enumerate_threads(pid)?)
    }

    fn create_suspended(&mut self, image: &Path, command_line: Option<&str>) -> Result<SpawnedProcess, DebuggeeError> {
        let application = wide(image.as_os_str());

        // CreateProcessW may write into the command line buffer
        let mut arguments = command_line.map(|args| {
            let mut line = format!("\"{}\" {}", image.display(), args);
            line.push('\0');
            line.encode_utf16().collect::<Vec<u16>>()
        });
        let command_line = match arguments.as_mut() {
            Some(buffer) => PWSTR(buffer.as_mut_ptr()),
            None => PWSTR::null(),
        };

        let startup = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            ..Default::default()
        };
        let mut info = PROCESS_INFORMATION::default();

        unsafe {
            CreateProcessW(
                PCWSTR(application.as_ptr()),
                command_line,
                None,
                None,
                false,
                CREATE_SUSPENDED,
                None,
                PCWSTR::null(),
                &startup,
                &mut info,
            )?;
            let _ = CloseHandle(info.hThread);
            let _ = CloseHandle(info.hProcess);
        }

        Ok(SpawnedProcess {
            pid: info.dwProcessId,
            tid: info.dwThreadId,
        })
    }

    fn is_32bit(&mut self, pid: u32) -> Result<bool, DebuggeeError> {
        let process = open_process(PROCESS_QUERY_LIMITED_INFORMATION, pid)?;
        let mut wow64 = BOOL::default();
        unsafe { IsWow64Process(process.0, &mut wow64)? };
        Ok(wow64.as_bool())
    }

    fn attach_thread(&mut self, _pid: u32, tid: u32) -> Result<(), DebuggeeError> {
        // Interception itself is done by the hypervisor; only check the thread is reachable
        open_thread(THREAD_SUSPEND_RESUME, tid)?;
        Ok(())
    }

    fn suspend_thread(&mut self, _pid: u32, tid: u32) -> Result<(), DebuggeeError> {
        let thread = open_thread(THREAD_SUSPEND_RESUME, tid)?;
        if unsafe { SuspendThread(thread.0) } == u32::MAX {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    #[cfg(target_arch = "x86_64")]
    fn capture_registers(&mut self, _pid: u32, tid: u32) -> Result<GuestRegisters, DebuggeeError> {
        let thread = open_thread(THREAD_GET_CONTEXT, tid)?;
        let mut context = AlignedContext(CONTEXT::default());
        context.0.ContextFlags = CONTEXT_FULL_AMD64;

        unsafe { GetThreadContext(thread.0, &mut context.0)? };

        let c = &context.0;
        Ok(GuestRegisters {
            rax: c.Rax,
            rcx: c.Rcx,
            rdx: c.Rdx,
            rbx: c.Rbx,
            rsp: c.Rsp,
            rbp: c.Rbp,
            rsi: c.Rsi,
            rdi: c.Rdi,
            r8: c.R8,
            r9: c.R9,
            r10: c.R10,
            r11: c.R11,
            r12: c.R12,
            r13: c.R13,
            r14: c.R14,
            r15: c.R15,
            rip: c.Rip,
            rflags: c.EFlags as u64,
        })
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn capture_registers(&mut self, _pid: u32, _tid: u32) -> Result<GuestRegisters, DebuggeeError> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "register snapshots need an x64 host").into())
    }

    fn resume_thread(&mut self, _pid: u32, tid: u32) -> Result<(), DebuggeeError> {
        let thread = open_thread(THREAD_SUSPEND_RESUME, tid)?;
        if unsafe { ResumeThread(thread.0) } == u32::MAX {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn release_created(&mut self, spawned: SpawnedProcess) -> Result<(), DebuggeeError> {
        self.resume_thread(spawned.pid, spawned.tid)
    }

    fn detach_thread(&mut self, _pid: u32, _tid: u32) -> Result<(), DebuggeeError> {
        Ok(())
    }

    fn terminate_process(&mut self, pid: u32) -> Result<(), DebuggeeError> {
        let process = match open_process(PROCESS_TERMINATE, pid) {
            Ok(process) => process,
            Err(_) => {
                log::debug!("process {:#x} is already gone", pid);
                return Ok(());
            }
        };
        unsafe { TerminateProcess(process.0, 0)? };
        Ok(())
    }
}
