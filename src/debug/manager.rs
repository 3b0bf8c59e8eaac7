//! Debuggee state machine
//!
//! `Detached -> Attaching -> Running <-> Paused`, and `Terminated` from any
//! tracked state through [`DebuggeeManager::kill`]. Records are keyed by
//! `(process id, thread id)`; at most one record exists per key and
//! debugging ids are never reused.

use super::types::{ActiveDebuggingThread, DebuggeeState, SpawnedProcess};
use super::{DebuggeeError, ProcessControl};
use crate::session::Session;
use crate::transport::{usermode, TransportError};
use std::collections::BTreeMap;
use std::path::Path;

pub struct DebuggeeManager<P: ProcessControl> {
    control: P,
    threads: BTreeMap<(u32, u32), ActiveDebuggingThread>,
    next_id: u64,
}

impl<P: ProcessControl> DebuggeeManager<P> {
    pub fn new(control: P) -> Self {
        Self {
            control,
            threads: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn control(&self) -> &P {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut P {
        &mut self.control
    }

    /// Attach to `tid` of a running process, or start `image` suspended when
    /// `pid` does not exist. Returns the new debugging id.
    pub fn attach(
        &mut self,
        session: &mut Session,
        pid: u32,
        tid: u32,
        image: Option<&Path>,
        command_line: Option<&str>,
    ) -> Result<u64, DebuggeeError> {
        if self.threads.contains_key(&(pid, tid)) {
            return Err(DebuggeeError::AlreadyAttached { pid, tid });
        }

        if self.control.process_exists(pid) {
            let threads = self.control.list_threads(pid)?;
            if !threads.contains(&tid) {
                return Err(DebuggeeError::ThreadProcessMismatch { pid, tid });
            }
            session.device()?;
            return self.finish_attach(session, pid, tid, None);
        }

        match image {
            Some(image) => self.start(session, image, command_line),
            None => Err(DebuggeeError::ProcessNotFound(pid)),
        }
    }

    /// Create `image` suspended and attach to its main thread
    pub fn start(
        &mut self,
        session: &mut Session,
        image: &Path,
        command_line: Option<&str>,
    ) -> Result<u64, DebuggeeError> {
        // Fail before a process exists if the kernel can't be told about it
        session.device()?;

        let spawned = self.control.create_suspended(image, command_line)?;
        log::info!(
            "created {} suspended (pid {:#x}, tid {:#x})",
            image.display(),
            spawned.pid,
            spawned.tid
        );
        self.finish_attach(session, spawned.pid, spawned.tid, Some(spawned))
    }

    fn finish_attach(
        &mut self,
        session: &mut Session,
        pid: u32,
        tid: u32,
        spawned: Option<SpawnedProcess>,
    ) -> Result<u64, DebuggeeError> {
        // A record left over from an earlier process with a recycled pid
        if self.threads.contains_key(&(pid, tid)) {
            if spawned.is_some() {
                self.abandon_created(pid);
            }
            return Err(DebuggeeError::AlreadyAttached { pid, tid });
        }

        let mut record = ActiveDebuggingThread::new(self.next_id, pid, tid, false);
        record.state = DebuggeeState::Attaching;
        log::debug!("attaching to pid {:#x} tid {:#x}", pid, tid);

        if let Err(err) = self.notify_attach(session, &mut record, spawned.is_some()) {
            if spawned.is_some() {
                self.abandon_created(pid);
            }
            return Err(err);
        }

        if let Some(spawned) = spawned {
            if let Err(err) = self.control.release_created(spawned) {
                log::warn!("failed to release created process {:#x}: {}", pid, err);
                if let Err(detach_err) = usermode::detach_process(session, pid, tid) {
                    log::warn!("kernel refused to detach created process {:#x}: {}", pid, detach_err);
                }
                self.abandon_created(pid);
                return Err(err);
            }
        }

        record.state = DebuggeeState::Running;
        let id = record.unique_debugging_id;
        self.next_id += 1;
        self.threads.insert((pid, tid), record);

        log::info!("debuggee {} attached (pid {:#x}, tid {:#x})", id, pid, tid);
        Ok(id)
    }

    /// OS attach, then the kernel notification. A refused notification undoes the
    /// OS attach of an existing thread; created processes are terminated by the caller.
    fn notify_attach(
        &mut self,
        session: &mut Session,
        record: &mut ActiveDebuggingThread,
        is_new_process: bool,
    ) -> Result<(), DebuggeeError> {
        let (pid, tid) = (record.process_id, record.thread_id);
        record.is_32bit = self.control.is_32bit(pid)?;
        self.control.attach_thread(pid, tid)?;

        if let Err(err) = usermode::attach_process(session, pid, tid, is_new_process) {
            if !is_new_process {
                if let Err(detach_err) = self.control.detach_thread(pid, tid) {
                    log::warn!("failed to detach tid {:#x} after the kernel refused it: {}", tid, detach_err);
                }
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn abandon_created(&mut self, pid: u32) {
        if let Err(err) = self.control.terminate_process(pid) {
            log::warn!("failed to terminate created process {:#x}: {}", pid, err);
        }
    }

    fn key_of(&self, id: u64, operation: &'static str) -> Result<(u32, u32), DebuggeeError> {
        self.threads
            .iter()
            .find(|(_, thread)| thread.unique_debugging_id == id)
            .map(|(key, _)| *key)
            .ok_or(DebuggeeError::InvalidStateTransition {
                from: DebuggeeState::Detached,
                operation,
            })
    }

    /// Suspend a running thread and snapshot its registers; a paused thread is left as is
    pub fn pause(&mut self, id: u64) -> Result<&ActiveDebuggingThread, DebuggeeError> {
        let key = self.key_of(id, "pause")?;
        let (pid, tid) = key;
        let state = self.threads.get(&key).map(|t| t.state).unwrap_or_default();

        match state {
            DebuggeeState::Paused => {}
            DebuggeeState::Running => {
                self.control.suspend_thread(pid, tid)?;
                let registers = match self.control.capture_registers(pid, tid) {
                    Ok(registers) => registers,
                    Err(err) => {
                        if let Err(resume_err) = self.control.resume_thread(pid, tid) {
                            log::warn!("failed to resume tid {:#x} after a failed snapshot: {}", tid, resume_err);
                        }
                        return Err(err);
                    }
                };
                if let Some(thread) = self.threads.get_mut(&key) {
                    thread.registers = registers;
                    thread.is_paused = true;
                    thread.state = DebuggeeState::Paused;
                }
                log::info!("debuggee {} paused at rip {:#x}", id, registers.rip);
            }
            from => {
                return Err(DebuggeeError::InvalidStateTransition {
                    from,
                    operation: "pause",
                })
            }
        }

        self.threads
            .get(&key)
            .ok_or(DebuggeeError::InvalidStateTransition {
                from: DebuggeeState::Detached,
                operation: "pause",
            })
    }

    /// Let a paused thread run again; its snapshot is kept but goes stale
    pub fn resume(&mut self, id: u64) -> Result<(), DebuggeeError> {
        let key = self.key_of(id, "resume")?;
        let state = self.threads.get(&key).map(|t| t.state).unwrap_or_default();
        if state != DebuggeeState::Paused {
            return Err(DebuggeeError::InvalidStateTransition {
                from: state,
                operation: "resume",
            });
        }

        self.control.resume_thread(key.0, key.1)?;
        if let Some(thread) = self.threads.get_mut(&key) {
            thread.is_paused = false;
            thread.state = DebuggeeState::Running;
        }
        log::info!("debuggee {} resumed", id);
        Ok(())
    }

    /// Terminate `pid` and drop every record for it; unknown pids are a no-op
    pub fn kill(&mut self, pid: u32) -> Result<Vec<ActiveDebuggingThread>, DebuggeeError> {
        let keys: Vec<(u32, u32)> = self.threads.range((pid, 0)..=(pid, u32::MAX)).map(|(k, _)| *k).collect();
        if keys.is_empty() {
            log::debug!("kill: pid {:#x} is not tracked", pid);
            return Ok(Vec::new());
        }

        self.control.terminate_process(pid)?;

        let killed: Vec<ActiveDebuggingThread> = keys
            .iter()
            .filter_map(|key| self.threads.remove(key))
            .map(|mut thread| {
                thread.is_active = false;
                thread.is_paused = false;
                thread.state = DebuggeeState::Terminated;
                thread
            })
            .collect();

        log::info!("process {:#x} terminated ({} thread record(s))", pid, killed.len());
        Ok(killed)
    }

    /// Resume if paused, tell the kernel to stop intercepting and drop the record
    pub fn detach(&mut self, session: &mut Session, id: u64) -> Result<ActiveDebuggingThread, DebuggeeError> {
        let key = self.key_of(id, "detach")?;
        let (pid, tid) = key;

        if self.threads.get(&key).is_some_and(|t| t.is_paused) {
            self.resume(id)?;
        }

        usermode::detach_process(session, pid, tid).map_err(|err: TransportError| {
            log::warn!("kernel refused to detach debuggee {}: {}", id, err);
            DebuggeeError::Kernel(err)
        })?;
        self.control.detach_thread(pid, tid)?;

        let mut thread = self.threads.remove(&key).ok_or(DebuggeeError::InvalidStateTransition {
            from: DebuggeeState::Detached,
            operation: "detach",
        })?;
        thread.is_active = false;
        thread.state = DebuggeeState::Detached;
        log::info!("debuggee {} detached", id);
        Ok(thread)
    }

    /// Set the opaque correlation handle of a tracked thread
    pub fn set_context(&mut self, id: u64, context: u64) -> Result<(), DebuggeeError> {
        let key = self.key_of(id, "set the context of")?;
        if let Some(thread) = self.threads.get_mut(&key) {
            thread.context = context;
        }
        Ok(())
    }

    pub fn get(&self, id: u64) -> Option<&ActiveDebuggingThread> {
        self.threads.values().find(|t| t.unique_debugging_id == id)
    }

    pub fn find(&self, pid: u32, tid: u32) -> Option<&ActiveDebuggingThread> {
        self.threads.get(&(pid, tid))
    }

    pub fn threads_of(&self, pid: u32) -> impl Iterator<Item = &ActiveDebuggingThread> {
        self.threads.range((pid, 0)..=(pid, u32::MAX)).map(|(_, t)| t)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveDebuggingThread> {
        self.threads.values()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}
