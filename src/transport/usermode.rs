//! Attach and detach notifications for user-mode debuggees

use super::{call, IoctlCode, TransportError};
use crate::session::Session;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachDetachAction {
    Attach = 1,
    Detach = 2,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct AttachDetachRequest {
    pub process_id: u32,
    pub thread_id: u32,
    pub action: u32,
    pub is_starting_new_process: u32,
}

/// Ask the kernel to start intercepting `pid`/`tid`
pub fn attach_process(
    session: &mut Session,
    pid: u32,
    tid: u32,
    is_starting_new_process: bool,
) -> Result<(), TransportError> {
    let request = AttachDetachRequest {
        process_id: pid,
        thread_id: tid,
        action: AttachDetachAction::Attach as u32,
        is_starting_new_process: is_starting_new_process as u32,
    };
    call(session, IoctlCode::AttachDetachUserModeProcess, request.as_bytes())?;
    log::debug!("kernel attached to pid {:#x} tid {:#x}", pid, tid);
    Ok(())
}

/// Stop intercepting `pid`/`tid`
pub fn detach_process(session: &mut Session, pid: u32, tid: u32) -> Result<(), TransportError> {
    let request = AttachDetachRequest {
        process_id: pid,
        thread_id: tid,
        action: AttachDetachAction::Detach as u32,
        is_starting_new_process: 0,
    };
    call(session, IoctlCode::AttachDetachUserModeProcess, request.as_bytes())?;
    log::debug!("kernel detached from pid {:#x} tid {:#x}", pid, tid);
    Ok(())
}
