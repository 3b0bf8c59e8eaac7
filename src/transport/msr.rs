//! One-shot MSR write (`wrmsr <msr> <value> [core <id>]`)

use super::{device_io, IoctlCode, TransportError};
use crate::command::ParsingErrorCause;
use crate::expr::{parse_hex_u32, parse_hex_u64, SymbolResolver};
use crate::session::Session;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Core number meaning "every core"
pub const MSR_APPLY_ALL_CORES: u32 = 0xffff_ffff;

const MSR_WRITE: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct MsrRequest {
    pub msr: u64,
    pub value: u64,
    pub core_number: u32,
    pub action_type: u32,
}

impl MsrRequest {
    pub fn write(msr: u64, value: u64, core_number: u32) -> Self {
        Self {
            msr,
            value,
            core_number,
            action_type: MSR_WRITE,
        }
    }

    /// Parse `wrmsr` tokens (command name first)
    pub fn parse<S: AsRef<str>>(tokens: &[S], resolver: &dyn SymbolResolver) -> Result<Self, ParsingErrorCause> {
        if tokens.len() >= 6 {
            return Err(ParsingErrorCause::InvalidSyntax(
                tokens.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" "),
            ));
        }

        let mut msr = None;
        let mut value = None;
        let mut core = None;
        let mut rest = tokens.iter().skip(1).map(AsRef::as_ref);

        while let Some(token) = rest.next() {
            if token.eq_ignore_ascii_case("core") {
                let id = rest.next().ok_or(ParsingErrorCause::MissingCoreScope)?;
                core = Some(parse_hex_u32(id).ok_or(ParsingErrorCause::MissingCoreScope)?);
            } else if msr.is_none() {
                msr = Some(parse_hex_u64(token).ok_or_else(|| ParsingErrorCause::InvalidSyntax(token.to_string()))?);
            } else if value.is_none() {
                let resolved = parse_hex_u64(token)
                    .or_else(|| resolver.resolve(token))
                    .ok_or_else(|| ParsingErrorCause::UnresolvedExpression(token.to_string()))?;
                value = Some(resolved);
            } else {
                return Err(ParsingErrorCause::InvalidSyntax(token.to_string()));
            }
        }

        let msr = msr.ok_or_else(|| ParsingErrorCause::InvalidSyntax("missing msr".into()))?;
        let value = value.ok_or_else(|| ParsingErrorCause::InvalidSyntax("missing value".into()))?;
        Ok(Self::write(msr, value, core.unwrap_or(MSR_APPLY_ALL_CORES)))
    }
}

/// Write an MSR through the device; the device returns no result record
pub fn write_msr(session: &mut Session, request: &MsrRequest) -> Result<(), TransportError> {
    let device = session.device()?;
    log::debug!(
        "wrmsr {:#x} <- {:#x} on core {:#x}",
        request.msr,
        request.value,
        request.core_number
    );
    device
        .control(IoctlCode::ReadOrWriteMsr, request.as_bytes(), &mut [])
        .map_err(|source| device_io(IoctlCode::ReadOrWriteMsr, source))?;
    Ok(())
}
