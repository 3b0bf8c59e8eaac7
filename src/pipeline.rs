//! Pipeline - event command to registered event
//!
//! Runs the builder, the action registry and the transport in that order. Any
//! failure drops what was built so far; on success the payloads belong to the
//! session's registered event.

use crate::action::parse_actions;
use crate::command::ParsingErrorCause;
use crate::event::{build_event, TrapKind};
use crate::expr::SymbolResolver;
use crate::session::Session;
use crate::transport::{register_event, TransportError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Parse(#[from] ParsingErrorCause),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Build, parse actions, and register one event command
pub fn submit_command<S: AsRef<str>>(
    session: &mut Session,
    kind: TrapKind,
    tokens: &[S],
    resolver: &dyn SymbolResolver,
) -> Result<u64, CommandError> {
    let event = build_event(tokens, kind, resolver)?;
    let actions = parse_actions(tokens)?;
    let tag = register_event(session, event, actions)?;
    Ok(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::NoSymbols;
    use crate::payload::ledger;

    #[test]
    fn test_parse_error_stops_before_transport() {
        let mut session = Session::new();
        let err = submit_command(&mut session, TrapKind::TrapExecutionSingleInstruction, &["!trace", "u"], &NoSymbols)
            .unwrap_err();
        assert!(matches!(err, CommandError::Parse(ParsingErrorCause::MissingProcessScope)));
    }

    #[test]
    fn test_no_device_releases_everything() {
        let mut session = Session::new();
        let before = ledger();
        let err = submit_command(
            &mut session,
            TrapKind::TrapExecutionSingleInstruction,
            &["!trace", "u", "pid", "4", "condition", "{90}", "code", "{c3}"],
            &NoSymbols,
        )
        .unwrap_err();
        assert!(matches!(err, CommandError::Transport(TransportError::DeviceNotLoaded)));

        let delta = ledger().since(before);
        assert_eq!(delta.allocated, 2);
        assert_eq!(delta.released, 2);
    }
}
