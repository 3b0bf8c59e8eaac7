//! Action Registry
//!
//! Picks the action clauses out of an event command: `code { hex }`,
//! `script { ... }` and the `break` flag. When the command names neither code
//! nor script the event breaks to the debugger.

use super::{ActionDescriptor, ActionKind, ActionList, ACTION_FLAGS};
use crate::command::{decode_hex_block, scan, Clause, ParsingErrorCause};
use crate::payload::Payload;

/// Build the ordered action list from a command's tokens (command name first)
pub fn parse_actions<S: AsRef<str>>(tokens: &[S]) -> Result<ActionList, ParsingErrorCause> {
    let clauses = scan(tokens)?;
    let mut actions = ActionList::new();

    for clause in &clauses {
        let action = match clause {
            Clause::Block { keyword: "code", body } => {
                ActionDescriptor::RunCustomCode(Payload::new(decode_hex_block("code", body)?))
            }
            Clause::Block { keyword: "script", body } => {
                ActionDescriptor::RunScript(Payload::new(body.as_bytes().to_vec()))
            }
            Clause::Word(word) if ACTION_FLAGS.iter().any(|f| f.eq_ignore_ascii_case(word)) => {
                ActionDescriptor::BreakToDebugger
            }
            _ => continue,
        };

        if let Err(rejected) = actions.insert(action) {
            return Err(ParsingErrorCause::InvalidSyntax(format!(
                "{} (only one '{}' action per event)",
                rejected.kind(),
                rejected.kind()
            )));
        }
    }

    let breaks = !actions.contains(ActionKind::RunCustomCode) && !actions.contains(ActionKind::RunScript);
    if breaks && !actions.contains(ActionKind::BreakToDebugger) {
        actions
            .insert(ActionDescriptor::BreakToDebugger)
            .map_err(|_| ParsingErrorCause::InvalidSyntax("break (only one 'break' action per event)".into()))?;
    }

    log::debug!(
        "parsed {} action(s) {:?}, {} payload bytes",
        actions.len(),
        actions.kinds(),
        actions.total_len()
    );
    Ok(actions)
}
