//! Windows hypervisor device (`\\.\HyperDbgHypervisorDevice`)

use super::{DeviceChannel, IoctlCode};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;

use windows::Win32::Foundation::HANDLE;
use windows::Win32::Storage::FileSystem::{FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE};
use windows::Win32::System::IO::DeviceIoControl;

pub const DEVICE_PATH: &str = r"\\.\HyperDbgHypervisorDevice";

/// Open handle to the hypervisor device; closed on drop
#[derive(Debug)]
pub struct HypervisorDevice {
    file: File,
}

impl HypervisorDevice {
    pub fn open() -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .share_mode(FILE_SHARE_READ.0 | FILE_SHARE_WRITE.0)
            .attributes(FILE_ATTRIBUTE_NORMAL.0)
            .open(DEVICE_PATH)?;
        log::debug!("opened {}", DEVICE_PATH);
        Ok(Self { file })
    }

    fn handle(&self) -> HANDLE {
        HANDLE(self.file.as_raw_handle() as isize)
    }
}

impl DeviceChannel for HypervisorDevice {
    fn control(&mut self, code: IoctlCode, input: &[u8], output: &mut [u8]) -> io::Result<usize> {
        let mut returned: u32 = 0;
        let output_ptr = if output.is_empty() {
            None
        } else {
            Some(output.as_mut_ptr().cast())
        };

        // SAFETY: both buffers outlive the synchronous call and their lengths are passed alongside
        let status = unsafe {
            DeviceIoControl(
                self.handle(),
                code.code(),
                Some(input.as_ptr().cast()),
                input.len() as u32,
                output_ptr,
                output.len() as u32,
                Some(&mut returned),
                None,
            )
        };

        match status {
            Ok(()) => Ok(returned as usize),
            Err(_) => Err(io::Error::last_os_error()),
        }
    }
}
