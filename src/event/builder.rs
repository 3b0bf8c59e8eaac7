//! Event Descriptor Builder
//!
//! Turns the clauses of an event command into a validated [`EventDescriptor`].
//! Each recognized keyword maps to one handler in [`EVENT_CLAUSES`]; every
//! handler sees its clause once and refuses to overwrite a field that is
//! already set, so "settable exactly once" holds for every option.

use super::{CoreScope, EventDescriptor, EventMode, EventOptions, ProcessScope, TrapKind, APPLY_TO_ALL_MSRS};
use crate::action::ACTION_FLAGS;
use crate::command::{decode_hex_block, scan, Clause, ParsingErrorCause};
use crate::expr::{parse_hex_u64, SymbolResolver};
use crate::payload::Payload;

type ClauseHandler =
    fn(&mut EventBuilder, Option<&str>, &dyn SymbolResolver) -> Result<(), ParsingErrorCause>;

/// Value keywords owned by the event builder
const EVENT_CLAUSES: &[(&str, ClauseHandler)] = &[
    ("pid", EventBuilder::on_pid),
    ("core", EventBuilder::on_core),
    ("imm", EventBuilder::on_immediate),
    ("sc", EventBuilder::on_short_circuit),
    ("buffer", EventBuilder::on_buffer),
];

/// Build an event of `kind` from a command's tokens (command name first).
///
/// Action clauses (`script`, `code`, `break`) are left for the action registry.
pub fn build_event<S: AsRef<str>>(
    tokens: &[S],
    kind: TrapKind,
    resolver: &dyn SymbolResolver,
) -> Result<EventDescriptor, ParsingErrorCause> {
    let clauses = scan(tokens)?;
    let mut builder = EventBuilder::new(kind);

    for clause in &clauses {
        match clause {
            Clause::Value { keyword, value } => {
                let handler = EVENT_CLAUSES
                    .iter()
                    .find(|(name, _)| name == keyword)
                    .map(|(_, handler)| *handler)
                    .ok_or_else(|| ParsingErrorCause::InvalidSyntax(keyword.to_string()))?;
                handler(&mut builder, *value, resolver)?;
            }
            Clause::Block { keyword, body } => {
                if *keyword == "condition" {
                    builder.on_condition(body)?;
                }
            }
            Clause::Word(word) => builder.on_word(word, resolver)?,
        }
    }

    let event = builder.finish()?;
    log::debug!(
        "built {} event ({} bytes): {:?}",
        event.kind,
        event.serialized_len(),
        event
    );
    Ok(event)
}

/// Hex first, then the resolver
fn resolve_value(token: &str, resolver: &dyn SymbolResolver) -> Result<u64, ParsingErrorCause> {
    parse_hex_u64(token)
        .or_else(|| resolver.resolve(token))
        .ok_or_else(|| ParsingErrorCause::UnresolvedExpression(token.to_string()))
}

fn resolve_u32(token: &str, resolver: &dyn SymbolResolver) -> Result<u32, ParsingErrorCause> {
    let value = resolve_value(token, resolver)?;
    u32::try_from(value).map_err(|_| ParsingErrorCause::InvalidSyntax(token.to_string()))
}

fn duplicate(keyword: &str) -> ParsingErrorCause {
    ParsingErrorCause::InvalidSyntax(format!("{} (specified more than once)", keyword))
}

/// Parser state for one event command
#[derive(Debug)]
struct EventBuilder {
    kind: TrapKind,
    mode: Option<(EventMode, String)>,
    process: Option<u32>,
    core: Option<u32>,
    immediate: Option<bool>,
    short_circuit: Option<bool>,
    buffer: Option<u64>,
    value: Option<u64>,
    condition: Option<Payload>,
}

impl EventBuilder {
    fn new(kind: TrapKind) -> Self {
        Self {
            kind,
            mode: None,
            process: None,
            core: None,
            immediate: None,
            short_circuit: None,
            buffer: None,
            value: None,
            condition: None,
        }
    }

    fn on_word(&mut self, word: &str, resolver: &dyn SymbolResolver) -> Result<(), ParsingErrorCause> {
        if let Some(mode) = EventMode::from_flag(word) {
            return self.on_mode(mode, word);
        }

        if ACTION_FLAGS.iter().any(|flag| flag.eq_ignore_ascii_case(word)) {
            return Ok(());
        }

        if self.kind.accepts_value() && self.value.is_none() {
            self.value = Some(resolve_value(word, resolver)?);
            return Ok(());
        }

        Err(ParsingErrorCause::InvalidSyntax(word.to_string()))
    }

    fn on_mode(&mut self, mode: EventMode, flag: &str) -> Result<(), ParsingErrorCause> {
        if self.kind.fixed_mode().is_some() {
            return Err(ParsingErrorCause::InvalidSyntax(flag.to_string()));
        }

        if let Some((_, first)) = &self.mode {
            return Err(ParsingErrorCause::ConflictingModeFlag {
                first: first.clone(),
                second: flag.to_string(),
            });
        }

        self.mode = Some((mode, flag.to_string()));
        Ok(())
    }

    fn on_pid(
        &mut self,
        value: Option<&str>,
        resolver: &dyn SymbolResolver,
    ) -> Result<(), ParsingErrorCause> {
        let value = value.ok_or(ParsingErrorCause::MissingProcessScope)?;
        if self.process.is_some() {
            return Err(duplicate("pid"));
        }
        self.process = Some(resolve_u32(value, resolver)?);
        Ok(())
    }

    fn on_core(
        &mut self,
        value: Option<&str>,
        resolver: &dyn SymbolResolver,
    ) -> Result<(), ParsingErrorCause> {
        let value = value.ok_or(ParsingErrorCause::MissingCoreScope)?;
        if self.core.is_some() {
            return Err(duplicate("core"));
        }
        self.core = Some(resolve_u32(value, resolver)?);
        Ok(())
    }

    fn on_immediate(
        &mut self,
        value: Option<&str>,
        _resolver: &dyn SymbolResolver,
    ) -> Result<(), ParsingErrorCause> {
        if self.immediate.is_some() {
            return Err(duplicate("imm"));
        }
        self.immediate = Some(parse_switch("imm", value, "yes", "no")?);
        Ok(())
    }

    fn on_short_circuit(
        &mut self,
        value: Option<&str>,
        _resolver: &dyn SymbolResolver,
    ) -> Result<(), ParsingErrorCause> {
        if self.short_circuit.is_some() {
            return Err(duplicate("sc"));
        }
        self.short_circuit = Some(parse_switch("sc", value, "on", "off")?);
        Ok(())
    }

    fn on_buffer(
        &mut self,
        value: Option<&str>,
        resolver: &dyn SymbolResolver,
    ) -> Result<(), ParsingErrorCause> {
        let value = value.ok_or_else(|| ParsingErrorCause::InvalidSyntax("buffer".into()))?;
        if self.buffer.is_some() {
            return Err(duplicate("buffer"));
        }
        self.buffer = Some(resolve_value(value, resolver)?);
        Ok(())
    }

    fn on_condition(&mut self, body: &str) -> Result<(), ParsingErrorCause> {
        if self.condition.is_some() {
            return Err(duplicate("condition"));
        }
        self.condition = Some(Payload::new(decode_hex_block("condition", body)?));
        Ok(())
    }

    fn finish(self) -> Result<EventDescriptor, ParsingErrorCause> {
        let mode = match self.kind.fixed_mode() {
            Some(mode) => mode,
            None => self
                .mode
                .map(|(mode, _)| mode)
                .ok_or(ParsingErrorCause::MissingModeFlag)?,
        };

        let process = self
            .process
            .map_or(ProcessScope::AllProcesses, ProcessScope::from_raw);
        if self.kind.requires_process_scope() && process == ProcessScope::AllProcesses {
            return Err(ParsingErrorCause::MissingProcessScope);
        }

        let optional_param1 = match self.kind {
            TrapKind::TrapExecutionSingleInstruction => u64::from(mode.raw()),
            TrapKind::RdmsrInstructionExecution | TrapKind::WrmsrInstructionExecution => {
                self.value.unwrap_or(APPLY_TO_ALL_MSRS)
            }
            TrapKind::CpuidInstructionExecution => 0,
        };

        Ok(EventDescriptor {
            kind: self.kind,
            mode,
            process,
            core: self.core.map_or(CoreScope::AllCores, CoreScope::from_raw),
            is_immediate: self.immediate.unwrap_or(false),
            short_circuit: self.short_circuit.unwrap_or(false),
            pre_allocated_buffer: self.buffer,
            options: EventOptions {
                optional_param1,
                optional_param2: 0,
            },
            condition: self.condition,
        })
    }
}

fn parse_switch(
    keyword: &str,
    value: Option<&str>,
    enabled: &str,
    disabled: &str,
) -> Result<bool, ParsingErrorCause> {
    match value {
        Some(v) if v.eq_ignore_ascii_case(enabled) => Ok(true),
        Some(v) if v.eq_ignore_ascii_case(disabled) => Ok(false),
        Some(v) => Err(ParsingErrorCause::InvalidSyntax(v.to_string())),
        None => Err(ParsingErrorCause::InvalidSyntax(keyword.to_string())),
    }
}
