//! Named pipe server for the test channel (Windows)

use super::{MessageChannel, MAX_MESSAGE_SIZE};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::windows::io::{AsRawHandle, FromRawHandle, RawHandle};

use windows::core::PCWSTR;
use windows::Win32::Foundation::{ERROR_PIPE_CONNECTED, HANDLE};
use windows::Win32::Storage::FileSystem::PIPE_ACCESS_DUPLEX;
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, PIPE_READMODE_MESSAGE, PIPE_TYPE_MESSAGE, PIPE_UNLIMITED_INSTANCES,
    PIPE_WAIT,
};

/// Message-mode pipe; the handle is owned by `file` and closed on drop
#[derive(Debug)]
pub struct NamedPipeServer {
    file: File,
}

impl NamedPipeServer {
    /// Create the pipe instance; buffers are sized to the largest test message
    pub fn create(name: &str) -> io::Result<Self> {
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        let handle = unsafe {
            CreateNamedPipeW(
                PCWSTR(wide.as_ptr()),
                PIPE_ACCESS_DUPLEX,
                PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
                PIPE_UNLIMITED_INSTANCES,
                MAX_MESSAGE_SIZE as u32,
                MAX_MESSAGE_SIZE as u32,
                0,
                None,
            )
        };
        if handle.is_invalid() {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: the handle was just created and nothing else owns it
        let file = unsafe { File::from_raw_handle(handle.0 as RawHandle) };
        log::debug!("pipe {} created", name);
        Ok(Self { file })
    }

    /// Block until the test process connects
    pub fn wait_for_client(&self) -> io::Result<()> {
        let handle = HANDLE(self.file.as_raw_handle() as isize);
        match unsafe { ConnectNamedPipe(handle, None) } {
            Ok(()) => Ok(()),
            Err(err) if err.code() == ERROR_PIPE_CONNECTED.to_hresult() => Ok(()),
            Err(_) => Err(io::Error::last_os_error()),
        }
    }
}

impl MessageChannel for NamedPipeServer {
    fn send(&mut self, message: &[u8]) -> io::Result<()> {
        self.file.write_all(message)
    }

    fn receive(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.file.read(buffer)
    }
}
