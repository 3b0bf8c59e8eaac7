//! Binary layout of an event descriptor
//!
//! A fixed little-endian header followed by `condition_length` condition bytes.

use super::{CoreScope, EventDescriptor, EventMode, EventOptions, ProcessScope, TrapKind};
use crate::payload::Payload;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Errors decoding a record received from (or meant for) the kernel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("record truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("unknown trap kind {0:#x}")]
    UnknownTrapKind(u32),

    #[error("invalid event mode {0:#x}")]
    InvalidMode(u32),

    #[error("unknown action type {0:#x}")]
    UnknownActionType(u32),

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct EventHeader {
    pub trap_kind: u32,
    pub mode: u32,
    pub process_id: u32,
    pub core_id: u32,
    pub is_immediate: u8,
    pub short_circuit: u8,
    pub reserved: [u8; 6],
    pub pre_allocated_buffer: u64,
    pub optional_param1: u64,
    pub optional_param2: u64,
    pub condition_length: u32,
    pub reserved2: u32,
}

pub const EVENT_HEADER_SIZE: usize = std::mem::size_of::<EventHeader>();

impl EventDescriptor {
    /// Total serialized length (header plus condition)
    pub fn serialized_len(&self) -> usize {
        EVENT_HEADER_SIZE + self.condition_len()
    }

    fn header(&self) -> EventHeader {
        EventHeader {
            trap_kind: self.kind.raw(),
            mode: self.mode.raw(),
            process_id: self.process.raw(),
            core_id: self.core.raw(),
            is_immediate: u8::from(self.is_immediate),
            short_circuit: u8::from(self.short_circuit),
            pre_allocated_buffer: self.pre_allocated_buffer.unwrap_or(0),
            optional_param1: self.options.optional_param1,
            optional_param2: self.options.optional_param2,
            condition_length: self.condition_len() as u32,
            ..Default::default()
        }
    }

    /// Serialize into the request buffer sent with the register-event call
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.serialized_len());
        bytes.extend_from_slice(self.header().as_bytes());
        if let Some(condition) = &self.condition {
            bytes.extend_from_slice(condition);
        }
        bytes
    }

    /// Reconstruct a descriptor from its serialized form
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (header, rest) = EventHeader::read_from_prefix(bytes).map_err(|_| WireError::Truncated {
            expected: EVENT_HEADER_SIZE,
            actual: bytes.len(),
        })?;

        let kind = TrapKind::from_raw(header.trap_kind)
            .ok_or(WireError::UnknownTrapKind(header.trap_kind))?;
        let mode = EventMode::from_raw(header.mode).ok_or(WireError::InvalidMode(header.mode))?;

        let condition_length = header.condition_length as usize;
        if rest.len() < condition_length {
            return Err(WireError::Truncated {
                expected: EVENT_HEADER_SIZE + condition_length,
                actual: bytes.len(),
            });
        }
        if rest.len() > condition_length {
            return Err(WireError::TrailingBytes(rest.len() - condition_length));
        }

        Ok(Self {
            kind,
            mode,
            process: ProcessScope::from_raw(header.process_id),
            core: CoreScope::from_raw(header.core_id),
            is_immediate: header.is_immediate != 0,
            short_circuit: header.short_circuit != 0,
            pre_allocated_buffer: (header.pre_allocated_buffer != 0)
                .then_some(header.pre_allocated_buffer),
            options: EventOptions {
                optional_param1: header.optional_param1,
                optional_param2: header.optional_param2,
            },
            condition: (condition_length > 0).then(|| Payload::new(rest.to_vec())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_event() -> EventDescriptor {
        EventDescriptor {
            kind: TrapKind::TrapExecutionSingleInstruction,
            mode: EventMode::KernelMode,
            process: ProcessScope::Process(0x400),
            core: CoreScope::Core(2),
            is_immediate: true,
            short_circuit: false,
            pre_allocated_buffer: Some(0x1000),
            options: EventOptions {
                optional_param1: EventMode::KernelMode.raw() as u64,
                optional_param2: 0,
            },
            condition: Some(Payload::new(vec![0x90, 0x90, 0xc3])),
        }
    }

    #[test]
    fn test_header_is_56_bytes() {
        assert_eq!(EVENT_HEADER_SIZE, 56);
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let event = trace_event();
        let bytes = event.encode();
        assert_eq!(bytes.len(), event.serialized_len());
        assert_eq!(EventDescriptor::decode(&bytes).unwrap(), event);
    }

    #[test]
    fn test_built_events_survive_the_wire() {
        use crate::event::build_event;
        use crate::expr::NoSymbols;

        let commands: &[&[&str]] = &[
            &["!trace", "u", "pid", "1c0"],
            &["!trace", "uk", "pid", "400", "core", "3", "imm", "yes", "sc", "on"],
            &["!trace", "k", "pid", "4", "buffer", "2000", "condition", "{", "90", "c3", "}"],
        ];

        for &tokens in commands {
            let built = build_event(tokens, TrapKind::TrapExecutionSingleInstruction, &NoSymbols).unwrap();
            let decoded = EventDescriptor::decode(&built.encode()).unwrap();
            assert_eq!(decoded.mode, built.mode);
            assert_eq!(decoded.process, built.process);
            assert_eq!(decoded.core, built.core);
            assert_eq!(decoded.is_immediate, built.is_immediate);
            assert_eq!(decoded.short_circuit, built.short_circuit);
            assert_eq!(decoded, built);
        }
    }

    #[test]
    fn test_sentinels_on_the_wire() {
        let mut event = trace_event();
        event.process = ProcessScope::AllProcesses;
        event.core = CoreScope::AllCores;
        let bytes = event.encode();
        assert_eq!(&bytes[8..12], &[0xff; 4]);
        assert_eq!(&bytes[12..16], &[0xff; 4]);
    }

    #[test]
    fn test_decode_rejects_bad_records() {
        let bytes = trace_event().encode();

        assert!(matches!(
            EventDescriptor::decode(&bytes[..20]),
            Err(WireError::Truncated { .. })
        ));
        assert!(matches!(
            EventDescriptor::decode(&bytes[..bytes.len() - 1]),
            Err(WireError::Truncated { .. })
        ));

        let mut extra = bytes.clone();
        extra.push(0);
        assert_eq!(EventDescriptor::decode(&extra), Err(WireError::TrailingBytes(1)));

        let mut bad_mode = bytes.clone();
        bad_mode[4] = 9;
        assert_eq!(EventDescriptor::decode(&bad_mode), Err(WireError::InvalidMode(9)));

        let mut bad_kind = bytes;
        bad_kind[0] = 0xee;
        assert_eq!(
            EventDescriptor::decode(&bad_kind),
            Err(WireError::UnknownTrapKind(0xee))
        );
    }
}
