//! Event module - interception event descriptors
//!
//! An [`EventDescriptor`] describes one "trap on this condition" request: what
//! triggers it, in which processor mode, for which process and core, and an
//! optional condition that gates its actions. Descriptors are produced by
//! [`builder::build_event`] and serialized by [`wire`].

pub mod builder;
pub mod wire;

pub use builder::build_event;
pub use wire::WireError;

use crate::payload::Payload;
use std::fmt;

/// Process id sentinel meaning "every process"
pub const APPLY_TO_ALL_PROCESSES: u32 = 0xffff_ffff;

/// Core id sentinel meaning "every core"
pub const APPLY_TO_ALL_CORES: u32 = 0xffff_ffff;

/// MSR index sentinel meaning "every MSR"
pub const APPLY_TO_ALL_MSRS: u64 = 0xffff_ffff;

/// What class of condition triggers an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapKind {
    /// Execution of each single instruction (`!trace`)
    TrapExecutionSingleInstruction,
    /// RDMSR executed (`!msrread`)
    RdmsrInstructionExecution,
    /// WRMSR executed (`!msrwrite`)
    WrmsrInstructionExecution,
    /// CPUID executed (`!cpuid`)
    CpuidInstructionExecution,
}

impl TrapKind {
    pub const ALL: [TrapKind; 4] = [
        TrapKind::TrapExecutionSingleInstruction,
        TrapKind::RdmsrInstructionExecution,
        TrapKind::WrmsrInstructionExecution,
        TrapKind::CpuidInstructionExecution,
    ];

    /// Value carried on the wire
    pub fn raw(self) -> u32 {
        match self {
            TrapKind::RdmsrInstructionExecution => 6,
            TrapKind::WrmsrInstructionExecution => 7,
            TrapKind::CpuidInstructionExecution => 10,
            TrapKind::TrapExecutionSingleInstruction => 24,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.raw() == raw)
    }

    /// The command that creates this kind of event
    pub fn command_name(self) -> &'static str {
        match self {
            TrapKind::TrapExecutionSingleInstruction => "!trace",
            TrapKind::RdmsrInstructionExecution => "!msrread",
            TrapKind::WrmsrInstructionExecution => "!msrwrite",
            TrapKind::CpuidInstructionExecution => "!cpuid",
        }
    }

    pub fn from_command(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.command_name().eq_ignore_ascii_case(name))
    }

    /// Whether the event must name a single target process
    pub fn requires_process_scope(self) -> bool {
        matches!(self, TrapKind::TrapExecutionSingleInstruction)
    }

    /// Mode used by kinds that take no mode flags; `None` means a flag is mandatory
    pub fn fixed_mode(self) -> Option<EventMode> {
        match self {
            TrapKind::TrapExecutionSingleInstruction => None,
            _ => Some(EventMode::UserAndKernelMode),
        }
    }

    /// Whether a bare value token (e.g. an MSR index) is accepted
    pub fn accepts_value(self) -> bool {
        matches!(
            self,
            TrapKind::RdmsrInstructionExecution | TrapKind::WrmsrInstructionExecution
        )
    }
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

/// Processor mode(s) an event intercepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventMode {
    UserAndKernelMode,
    UserMode,
    KernelMode,
    Invalid,
}

impl EventMode {
    pub fn raw(self) -> u32 {
        match self {
            EventMode::UserAndKernelMode => 1,
            EventMode::UserMode => 3,
            EventMode::KernelMode => 4,
            EventMode::Invalid => 5,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(EventMode::UserAndKernelMode),
            3 => Some(EventMode::UserMode),
            4 => Some(EventMode::KernelMode),
            5 => Some(EventMode::Invalid),
            _ => None,
        }
    }

    /// Map a command flag (`u`, `k`, `uk`, `ku`) to a mode
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag.to_ascii_lowercase().as_str() {
            "u" => Some(EventMode::UserMode),
            "k" => Some(EventMode::KernelMode),
            "uk" | "ku" => Some(EventMode::UserAndKernelMode),
            _ => None,
        }
    }
}

/// Which process(es) may trigger an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessScope {
    AllProcesses,
    Process(u32),
}

impl ProcessScope {
    pub fn raw(self) -> u32 {
        match self {
            ProcessScope::AllProcesses => APPLY_TO_ALL_PROCESSES,
            ProcessScope::Process(pid) => pid,
        }
    }

    pub fn from_raw(raw: u32) -> Self {
        if raw == APPLY_TO_ALL_PROCESSES {
            ProcessScope::AllProcesses
        } else {
            ProcessScope::Process(raw)
        }
    }
}

/// Which core(s) may trigger an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreScope {
    AllCores,
    Core(u32),
}

impl CoreScope {
    pub fn raw(self) -> u32 {
        match self {
            CoreScope::AllCores => APPLY_TO_ALL_CORES,
            CoreScope::Core(core) => core,
        }
    }

    pub fn from_raw(raw: u32) -> Self {
        if raw == APPLY_TO_ALL_CORES {
            CoreScope::AllCores
        } else {
            CoreScope::Core(raw)
        }
    }
}

/// Generic option slots whose meaning depends on the trap kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventOptions {
    /// Trace events: target mode. MSR events: MSR index.
    pub optional_param1: u64,
    pub optional_param2: u64,
}

/// One interception request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub kind: TrapKind,
    pub mode: EventMode,
    pub process: ProcessScope,
    pub core: CoreScope,
    pub is_immediate: bool,
    pub short_circuit: bool,
    pub pre_allocated_buffer: Option<u64>,
    pub options: EventOptions,
    /// Raw bytecode evaluated before any action runs
    pub condition: Option<Payload>,
}

impl EventDescriptor {
    /// Length of the condition buffer in bytes
    pub fn condition_len(&self) -> usize {
        self.condition.as_ref().map_or(0, |c| c.len())
    }
}
