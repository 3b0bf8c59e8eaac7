//! Linux debuggee control using ptrace and /proc.

use super::types::{GuestRegisters, SpawnedProcess};
use super::{DebuggeeError, ProcessControl};

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

const ELFCLASS32: u8 = 1;

/// How the controller traces a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tracee {
    pid: u32,
    /// Attached with `PTRACE_SEIZE`; otherwise a child created through `PTRACE_TRACEME`
    seized: bool,
    /// In a ptrace stop
    stopped: bool,
}

/// Linux process control
#[derive(Debug, Default)]
pub struct LinuxProcessControl {
    tracees: HashMap<u32, Tracee>,
}

impl LinuxProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn tracee(&mut self, tid: u32) -> Result<&mut Tracee, DebuggeeError> {
        self.tracees
            .get_mut(&tid)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("thread {tid:#x} is not traced")).into())
    }

    /// Bring a traced thread into a ptrace stop; a stopped thread is left alone
    fn stop(&mut self, tid: u32) -> Result<(), DebuggeeError> {
        let tracee = self.tracee(tid)?;
        if tracee.stopped {
            return Ok(());
        }

        if tracee.seized {
            ptrace::interrupt(pid(tid))?;
        } else {
            signal::kill(pid(tid), Signal::SIGSTOP)?;
        }
        waitpid(pid(tid), Some(WaitPidFlag::__WALL))?;
        tracee.stopped = true;
        Ok(())
    }

    /// Restart a stopped thread, dropping the signal that stopped it
    fn cont(&mut self, tid: u32) -> Result<(), DebuggeeError> {
        let tracee = self.tracee(tid)?;
        ptrace::cont(pid(tid), None)?;
        tracee.stopped = false;
        Ok(())
    }
}

fn pid(raw: u32) -> Pid {
    Pid::from_raw(raw as i32)
}

impl ProcessControl for LinuxProcessControl {
    fn process_exists(&mut self, pid: u32) -> bool {
        pid != 0 && Path::new(&format!("/proc/{pid}")).exists()
    }

    fn list_threads(&mut self, pid: u32) -> Result<Vec<u32>, DebuggeeError> {
        let mut threads = Vec::new();
        for entry in fs::read_dir(format!("/proc/{pid}/task"))? {
            if let Some(tid) = entry?.file_name().to_str().and_then(|name| name.parse().ok()) {
                threads.push(tid);
            }
        }
        Ok(threads)
    }

    /// The child asks to be traced and stops with `SIGTRAP` right after exec,
    /// so the new image is in place but has not run an instruction.
    fn create_suspended(&mut self, image: &Path, command_line: Option<&str>) -> Result<SpawnedProcess, DebuggeeError> {
        let mut command = Command::new(image);
        if let Some(args) = command_line {
            command.args(args.split_whitespace());
        }

        // SAFETY: PTRACE_TRACEME is a single syscall and async-signal-safe
        unsafe {
            command.pre_exec(|| ptrace::traceme().map_err(io::Error::from));
        }

        let child = command.spawn()?;
        let spawned = child.id();

        match waitpid(pid(spawned), None)? {
            WaitStatus::Stopped(_, _) => {}
            status => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("{} did not stop after exec: {:?}", image.display(), status),
                )
                .into())
            }
        }

        self.tracees.insert(
            spawned,
            Tracee {
                pid: spawned,
                seized: false,
                stopped: true,
            },
        );
        Ok(SpawnedProcess {
            pid: spawned,
            tid: spawned,
        })
    }

    fn is_32bit(&mut self, pid: u32) -> Result<bool, DebuggeeError> {
        let mut ident = [0u8; 5];
        File::open(format!("/proc/{pid}/exe"))?.read_exact(&mut ident)?;
        Ok(ident[4] == ELFCLASS32)
    }

    fn attach_thread(&mut self, pid_raw: u32, tid: u32) -> Result<(), DebuggeeError> {
        // Created processes are traced since exec
        if self.tracees.contains_key(&tid) {
            return Ok(());
        }

        ptrace::seize(pid(tid), ptrace::Options::empty())?;
        self.tracees.insert(
            tid,
            Tracee {
                pid: pid_raw,
                seized: true,
                stopped: false,
            },
        );
        Ok(())
    }

    fn suspend_thread(&mut self, _pid: u32, tid: u32) -> Result<(), DebuggeeError> {
        self.stop(tid)
    }

    #[cfg(target_arch = "x86_64")]
    fn capture_registers(&mut self, _pid: u32, tid: u32) -> Result<GuestRegisters, DebuggeeError> {
        let context = ptrace::getregs(pid(tid))?;

        Ok(GuestRegisters {
            rax: context.rax,
            rcx: context.rcx,
            rdx: context.rdx,
            rbx: context.rbx,
            rsp: context.rsp,
            rbp: context.rbp,
            rsi: context.rsi,
            rdi: context.rdi,
            r8: context.r8,
            r9: context.r9,
            r10: context.r10,
            r11: context.r11,
            r12: context.r12,
            r13: context.r13,
            r14: context.r14,
            r15: context.r15,
            rip: context.rip,
            rflags: context.eflags,
        })
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn capture_registers(&mut self, _pid: u32, _tid: u32) -> Result<GuestRegisters, DebuggeeError> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "register snapshots need an x86_64 host").into())
    }

    fn resume_thread(&mut self, _pid: u32, tid: u32) -> Result<(), DebuggeeError> {
        self.cont(tid)
    }

    /// Continue from the post-exec stop
    fn release_created(&mut self, spawned: SpawnedProcess) -> Result<(), DebuggeeError> {
        self.cont(spawned.tid)
    }

    fn detach_thread(&mut self, _pid: u32, tid: u32) -> Result<(), DebuggeeError> {
        self.stop(tid)?;
        ptrace::detach(pid(tid), None)?;
        self.tracees.remove(&tid);
        Ok(())
    }

    fn terminate_process(&mut self, raw: u32) -> Result<(), DebuggeeError> {
        match signal::kill(pid(raw), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => return Err(err.into()),
        }

        let created = self.tracees.get(&raw).is_some_and(|t| t.pid == raw && !t.seized);
        self.tracees.retain(|_, tracee| tracee.pid != raw);

        // Our own child: reap it so it doesn't linger as a zombie
        if created {
            if let Err(err) = waitpid(pid(raw), None) {
                log::debug!("reaping {:#x} failed: {}", raw, err);
            }
        }
        Ok(())
    }
}
