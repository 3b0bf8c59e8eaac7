//! Shared fakes for the integration tests: a scripted hypervisor device and
//! an in-memory process table.

#![allow(dead_code)]

use hyperctl::debug::{DebuggeeError, GuestRegisters, ProcessControl, SpawnedProcess};
use hyperctl::transport::{DeviceChannel, IoctlCode, KernelResult};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use zerocopy::IntoBytes;

/// One request the device received
#[derive(Debug, Clone)]
pub struct Call {
    pub ioctl: IoctlCode,
    pub input: Vec<u8>,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// How the device answers one request
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Result(KernelResult),
    /// Write only this many bytes of a successful result
    Short(usize),
    OsError(i32),
}

/// Device that answers from per-ioctl scripts, then succeeds by default.
/// Register-event calls get increasing tags starting at 0x1000.
pub struct MockDevice {
    scripts: HashMap<IoctlCode, VecDeque<Reply>>,
    next_tag: u64,
    log: CallLog,
}

impl MockDevice {
    pub fn new() -> (Self, CallLog) {
        let log = CallLog::default();
        let device = Self {
            scripts: HashMap::new(),
            next_tag: 0x1000,
            log: log.clone(),
        };
        (device, log)
    }

    pub fn script(mut self, ioctl: IoctlCode, reply: Reply) -> Self {
        self.scripts.entry(ioctl).or_default().push_back(reply);
        self
    }

    fn default_reply(&mut self, ioctl: IoctlCode) -> Reply {
        match ioctl {
            IoctlCode::RegisterEvent => {
                let tag = self.next_tag;
                self.next_tag += 1;
                Reply::Result(KernelResult::success(tag))
            }
            _ => Reply::Result(KernelResult::success(0)),
        }
    }
}

impl DeviceChannel for MockDevice {
    fn control(&mut self, ioctl: IoctlCode, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        self.log.lock().unwrap().push(Call {
            ioctl,
            input: input.to_vec(),
        });

        let scripted = self.scripts.get_mut(&ioctl).and_then(VecDeque::pop_front);
        let reply = match scripted {
            Some(reply) => reply,
            None => self.default_reply(ioctl),
        };

        match reply {
            Reply::Result(result) => {
                let bytes = result.as_bytes();
                let n = bytes.len().min(output.len());
                output[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Reply::Short(n) => Ok(n.min(output.len())),
            Reply::OsError(code) => Err(io::Error::from_raw_os_error(code)),
        }
    }
}

pub fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

pub fn ioctls(log: &CallLog) -> Vec<IoctlCode> {
    log.lock().unwrap().iter().map(|c| c.ioctl).collect()
}

/// Process table with every OS primitive recorded
#[derive(Debug, Default)]
pub struct MockProcessControl {
    /// pid -> thread ids
    pub processes: BTreeMap<u32, Vec<u32>>,
    pub suspended: Vec<(u32, u32)>,
    pub attached: Vec<(u32, u32)>,
    pub terminated: Vec<u32>,
    pub released: Vec<SpawnedProcess>,
    pub registers: GuestRegisters,
    pub fail_capture: bool,
    pub fail_release: bool,
    /// Pid handed to the next created process
    pub next_pid: u32,
}

impl MockProcessControl {
    pub fn new() -> Self {
        Self {
            next_pid: 0x2000,
            ..Default::default()
        }
    }

    pub fn with_process(mut self, pid: u32, threads: &[u32]) -> Self {
        self.processes.insert(pid, threads.to_vec());
        self
    }
}

fn gone(pid: u32) -> DebuggeeError {
    DebuggeeError::ProcessNotFound(pid)
}

impl ProcessControl for MockProcessControl {
    fn process_exists(&mut self, pid: u32) -> bool {
        self.processes.contains_key(&pid)
    }

    fn list_threads(&mut self, pid: u32) -> Result<Vec<u32>, DebuggeeError> {
        self.processes.get(&pid).cloned().ok_or_else(|| gone(pid))
    }

    fn create_suspended(&mut self, _image: &Path, _command_line: Option<&str>) -> Result<SpawnedProcess, DebuggeeError> {
        let pid = self.next_pid;
        self.next_pid += 4;
        let tid = pid + 1;
        self.processes.insert(pid, vec![tid]);
        self.suspended.push((pid, tid));
        Ok(SpawnedProcess { pid, tid })
    }

    fn is_32bit(&mut self, pid: u32) -> Result<bool, DebuggeeError> {
        if self.processes.contains_key(&pid) {
            Ok(false)
        } else {
            Err(gone(pid))
        }
    }

    fn attach_thread(&mut self, pid: u32, tid: u32) -> Result<(), DebuggeeError> {
        self.attached.push((pid, tid));
        Ok(())
    }

    fn suspend_thread(&mut self, pid: u32, tid: u32) -> Result<(), DebuggeeError> {
        self.suspended.push((pid, tid));
        Ok(())
    }

    fn capture_registers(&mut self, pid: u32, _tid: u32) -> Result<GuestRegisters, DebuggeeError> {
        if self.fail_capture {
            return Err(gone(pid));
        }
        Ok(self.registers)
    }

    fn resume_thread(&mut self, pid: u32, tid: u32) -> Result<(), DebuggeeError> {
        self.suspended.retain(|&entry| entry != (pid, tid));
        Ok(())
    }

    fn release_created(&mut self, spawned: SpawnedProcess) -> Result<(), DebuggeeError> {
        if self.fail_release {
            return Err(gone(spawned.pid));
        }
        self.suspended.retain(|&entry| entry != (spawned.pid, spawned.tid));
        self.released.push(spawned);
        Ok(())
    }

    fn detach_thread(&mut self, pid: u32, tid: u32) -> Result<(), DebuggeeError> {
        self.attached.retain(|&entry| entry != (pid, tid));
        Ok(())
    }

    fn terminate_process(&mut self, pid: u32) -> Result<(), DebuggeeError> {
        self.processes.remove(&pid);
        self.terminated.push(pid);
        Ok(())
    }
}
