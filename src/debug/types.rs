//! Common types for usermode debuggee control.

use std::fmt;

/// Process and main thread of a process created suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedProcess {
    pub pid: u32,
    pub tid: u32,
}

/// Lifecycle of a tracked debuggee thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebuggeeState {
    #[default]
    Detached,
    Attaching,
    Running,
    Paused,
    Terminated,
}

impl fmt::Display for DebuggeeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebuggeeState::Detached => "detached",
            DebuggeeState::Attaching => "attaching",
            DebuggeeState::Running => "running",
            DebuggeeState::Paused => "paused",
            DebuggeeState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// General purpose register snapshot (x64)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuestRegisters {
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rbx: u64,
    pub rsp: u64,
    pub rbp: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}

impl GuestRegisters {
    /// Register names in display order
    pub const NAMES: [&'static str; 18] = [
        "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12", "r13",
        "r14", "r15", "rip", "rflags",
    ];

    /// Look a register up by name, case-insensitively
    pub fn get(&self, name: &str) -> Option<u64> {
        let value = match name.to_ascii_lowercase().as_str() {
            "rax" => self.rax,
            "rbx" => self.rbx,
            "rcx" => self.rcx,
            "rdx" => self.rdx,
            "rsi" => self.rsi,
            "rdi" => self.rdi,
            "rbp" => self.rbp,
            "rsp" => self.rsp,
            "r8" => self.r8,
            "r9" => self.r9,
            "r10" => self.r10,
            "r11" => self.r11,
            "r12" => self.r12,
            "r13" => self.r13,
            "r14" => self.r14,
            "r15" => self.r15,
            "rip" => self.rip,
            "rflags" => self.rflags,
            _ => return None,
        };
        Some(value)
    }
}

/// One intercepted user-mode thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDebuggingThread {
    pub unique_debugging_id: u64,
    pub process_id: u32,
    pub thread_id: u32,
    pub is_active: bool,
    pub is_paused: bool,
    /// Snapshot from the last pause; stale while running
    pub registers: GuestRegisters,
    /// Opaque correlation handle (`$context`)
    pub context: u64,
    pub is_32bit: bool,
    pub state: DebuggeeState,
}

impl ActiveDebuggingThread {
    pub(crate) fn new(unique_debugging_id: u64, process_id: u32, thread_id: u32, is_32bit: bool) -> Self {
        Self {
            unique_debugging_id,
            process_id,
            thread_id,
            is_active: true,
            is_paused: false,
            registers: GuestRegisters::default(),
            context: 0,
            is_32bit,
            state: DebuggeeState::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup() {
        let regs = GuestRegisters {
            rcx: 0x10,
            r15: 0x20,
            ..Default::default()
        };
        assert_eq!(regs.get("RCX"), Some(0x10));
        assert_eq!(regs.get("r15"), Some(0x20));
        assert_eq!(regs.get("xmm0"), None);
        assert!(GuestRegisters::NAMES.iter().all(|n| regs.get(n).is_some()));
    }
}
