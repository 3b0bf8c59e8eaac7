//! Kernel Transport - request/response calls into the hypervisor device
//!
//! Every call goes through the session's [`DeviceChannel`]. A missing device is a
//! precondition failure ([`TransportError::DeviceNotLoaded`]); a failing control
//! call is reported with the platform error code as-is; a payload the kernel
//! refuses comes back as [`TransportError::Rejected`]. Nothing here retries.

pub mod event;
pub mod msr;
pub mod usermode;

#[cfg(target_os = "windows")]
pub mod windows;

pub use event::{
    attach_actions, clear_event, register_event, set_event_enabled, submit_event, RegisteredEvent,
    SubmittedEvent,
};
pub use msr::{write_msr, MsrRequest};

use crate::action::ActionKind;
use crate::session::Session;
use std::io;
use thiserror::Error;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

const FILE_DEVICE_UNKNOWN: u32 = 0x0000_0022;
const METHOD_BUFFERED: u32 = 0;
const FILE_ANY_ACCESS: u32 = 0;

const fn ctl_code(device_type: u32, function: u32, method: u32, access: u32) -> u32 {
    (device_type << 16) | (access << 14) | (function << 2) | method
}

/// Operations understood by the hypervisor device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoctlCode {
    ReadOrWriteMsr,
    RegisterEvent,
    AddActionToEvent,
    ModifyEvent,
    AttachDetachUserModeProcess,
}

impl IoctlCode {
    fn function(self) -> u32 {
        match self {
            IoctlCode::ReadOrWriteMsr => 0x803,
            IoctlCode::RegisterEvent => 0x805,
            IoctlCode::AddActionToEvent => 0x806,
            IoctlCode::ModifyEvent => 0x80b,
            IoctlCode::AttachDetachUserModeProcess => 0x814,
        }
    }

    /// The `CTL_CODE` value passed to the device
    pub fn code(self) -> u32 {
        ctl_code(FILE_DEVICE_UNKNOWN, self.function(), METHOD_BUFFERED, FILE_ANY_ACCESS)
    }
}

/// The trusted boundary: a device-handle-gated request/response call
pub trait DeviceChannel: Send {
    /// Issue `code` with `input`, filling `output`; returns the bytes written to `output`
    fn control(&mut self, code: IoctlCode, input: &[u8], output: &mut [u8]) -> io::Result<usize>;
}

/// Result record the kernel writes back for event, action and attach requests
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct KernelResult {
    pub is_successful: u32,
    pub error: u32,
    /// Event tag (register-event) or unused
    pub tag: u64,
}

pub const KERNEL_RESULT_SIZE: usize = std::mem::size_of::<KernelResult>();

impl KernelResult {
    pub fn success(tag: u64) -> Self {
        Self {
            is_successful: 1,
            error: 0,
            tag,
        }
    }

    pub fn failure(error: u32) -> Self {
        Self {
            is_successful: 0,
            error,
            tag: 0,
        }
    }
}

/// Transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("handle of the driver not found, probably the driver is not loaded")]
    DeviceNotLoaded,

    #[error("ioctl {ioctl:?} failed with code ({code:#x})")]
    DeviceIo {
        ioctl: IoctlCode,
        code: i32,
        #[source]
        source: io::Error,
    },

    #[error("the kernel rejected {ioctl:?} with error {code:#x}")]
    Rejected { ioctl: IoctlCode, code: u32 },

    #[error("short response to {ioctl:?}: expected {expected} bytes, got {actual}")]
    ShortResponse {
        ioctl: IoctlCode,
        expected: usize,
        actual: usize,
    },

    #[error("'{kind}' action rejected for event {tag:#x}, the event was removed")]
    ActionRejected {
        tag: u64,
        kind: ActionKind,
        #[source]
        source: Box<TransportError>,
    },

    #[error("'{kind}' action rejected for event {tag:#x} and the event could not be removed: {action}")]
    OrphanedEvent {
        tag: u64,
        kind: ActionKind,
        action: Box<TransportError>,
        #[source]
        rollback: Box<TransportError>,
    },
}

impl TransportError {
    /// Raw platform error code, when the control call itself failed
    pub fn os_code(&self) -> Option<i32> {
        match self {
            TransportError::DeviceIo { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Issue a request that expects a [`KernelResult`] back
pub(crate) fn call(session: &mut Session, ioctl: IoctlCode, input: &[u8]) -> Result<KernelResult, TransportError> {
    let device = session.device()?;
    let mut result = KernelResult::new_zeroed();

    log::debug!("ioctl {:?} ({:#x}), {} input bytes", ioctl, ioctl.code(), input.len());
    let written = device
        .control(ioctl, input, result.as_mut_bytes())
        .map_err(|source| device_io(ioctl, source))?;

    if written < KERNEL_RESULT_SIZE {
        return Err(TransportError::ShortResponse {
            ioctl,
            expected: KERNEL_RESULT_SIZE,
            actual: written,
        });
    }

    if result.is_successful == 0 {
        return Err(TransportError::Rejected {
            ioctl,
            code: result.error,
        });
    }

    Ok(result)
}

pub(crate) fn device_io(ioctl: IoctlCode, source: io::Error) -> TransportError {
    TransportError::DeviceIo {
        ioctl,
        code: source.raw_os_error().unwrap_or(-1),
        source,
    }
}
