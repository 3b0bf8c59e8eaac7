//! Debug module - usermode debuggee control.
//!
//! Provides the debuggee state machine and the OS primitives behind it:
//! - Attach to an existing thread or start a process suspended
//! - Pause with a register snapshot, resume
//! - Kill and detach

pub mod manager;
pub mod types;

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "linux")]
pub mod linux;

pub use manager::DebuggeeManager;
pub use types::{ActiveDebuggingThread, DebuggeeState, GuestRegisters, SpawnedProcess};

#[cfg(target_os = "windows")]
pub use windows::WindowsProcessControl as PlatformProcessControl;

#[cfg(target_os = "linux")]
pub use linux::LinuxProcessControl as PlatformProcessControl;

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
pub use unsupported::UnsupportedProcessControl as PlatformProcessControl;

use crate::transport::TransportError;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Debuggee control failures
#[derive(Error, Debug)]
pub enum DebuggeeError {
    #[error("cannot {operation} a debuggee that is {from}")]
    InvalidStateTransition {
        from: DebuggeeState,
        operation: &'static str,
    },

    #[error("thread id {tid:#x} doesn't belong to process id {pid:#x}")]
    ThreadProcessMismatch { pid: u32, tid: u32 },

    #[error("thread id {tid:#x} of process id {pid:#x} is already attached")]
    AlreadyAttached { pid: u32, tid: u32 },

    #[error("process id {0:#x} not found and no image path was given")]
    ProcessNotFound(u32),

    #[error("kernel refused the request: {0}")]
    Kernel(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[cfg(target_os = "linux")]
    #[error(transparent)]
    Nix(#[from] nix::Error),

    #[cfg(target_os = "windows")]
    #[error(transparent)]
    Windows(#[from] ::windows::core::Error),
}

/// OS primitives the debuggee state machine is built on
pub trait ProcessControl {
    fn process_exists(&mut self, pid: u32) -> bool;

    /// Thread ids currently owned by `pid`
    fn list_threads(&mut self, pid: u32) -> Result<Vec<u32>, DebuggeeError>;

    /// Create a process whose main thread does not run until [`ProcessControl::release_created`]
    fn create_suspended(&mut self, image: &Path, command_line: Option<&str>) -> Result<SpawnedProcess, DebuggeeError>;

    fn is_32bit(&mut self, pid: u32) -> Result<bool, DebuggeeError>;

    fn attach_thread(&mut self, pid: u32, tid: u32) -> Result<(), DebuggeeError>;

    fn suspend_thread(&mut self, pid: u32, tid: u32) -> Result<(), DebuggeeError>;

    /// Registers of a suspended thread
    fn capture_registers(&mut self, pid: u32, tid: u32) -> Result<GuestRegisters, DebuggeeError>;

    fn resume_thread(&mut self, pid: u32, tid: u32) -> Result<(), DebuggeeError>;

    fn release_created(&mut self, spawned: SpawnedProcess) -> Result<(), DebuggeeError>;

    fn detach_thread(&mut self, pid: u32, tid: u32) -> Result<(), DebuggeeError>;

    /// Terminate `pid`; a process that is already gone is not an error
    fn terminate_process(&mut self, pid: u32) -> Result<(), DebuggeeError>;
}

#[cfg(not(any(target_os = "windows", target_os = "linux")))]
mod unsupported {
    use super::*;

    fn unsupported() -> DebuggeeError {
        DebuggeeError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "debuggee control is not available on this platform",
        ))
    }

    #[derive(Debug, Default)]
    pub struct UnsupportedProcessControl;

    impl UnsupportedProcessControl {
        pub fn new() -> Self {
            Self
        }
    }

    impl ProcessControl for UnsupportedProcessControl {
        fn process_exists(&mut self, _pid: u32) -> bool {
            false
        }
        fn list_threads(&mut self, _pid: u32) -> Result<Vec<u32>, DebuggeeError> {
            Err(unsupported())
        }
        fn create_suspended(&mut self, _image: &Path, _command_line: Option<&str>) -> Result<SpawnedProcess, DebuggeeError> {
            Err(unsupported())
        }
        fn is_32bit(&mut self, _pid: u32) -> Result<bool, DebuggeeError> {
            Err(unsupported())
        }
        fn attach_thread(&mut self, _pid: u32, _tid: u32) -> Result<(), DebuggeeError> {
            Err(unsupported())
        }
        fn suspend_thread(&mut self, _pid: u32, _tid: u32) -> Result<(), DebuggeeError> {
            Err(unsupported())
        }
        fn capture_registers(&mut self, _pid: u32, _tid: u32) -> Result<GuestRegisters, DebuggeeError> {
            Err(unsupported())
        }
        fn resume_thread(&mut self, _pid: u32, _tid: u32) -> Result<(), DebuggeeError> {
            Err(unsupported())
        }
        fn release_created(&mut self, _spawned: SpawnedProcess) -> Result<(), DebuggeeError> {
            Err(unsupported())
        }
        fn detach_thread(&mut self, _pid: u32, _tid: u32) -> Result<(), DebuggeeError> {
            Err(unsupported())
        }
        fn terminate_process(&mut self, _pid: u32) -> Result<(), DebuggeeError> {
            Ok(())
        }
    }
}
