//! Command processing
//!
//! Splits a console line into tokens and recognizes the controller commands.
//! Event commands keep their tokens; the builder and registry parse them.

use hyperctl::event::TrapKind;
use hyperctl::expr::parse_hex_u32;
use hyperctl::expr::parse_hex_u64;

/// What `events` should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventsAction {
    List,
    Enable(u64),
    Disable(u64),
    Clear(u64),
}

/// Application commands that can be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// `!trace`, `!msrread`, `!msrwrite`, `!cpuid` with their tokens
    Event { kind: TrapKind, tokens: Vec<String> },
    /// `wrmsr <msr> <value> [core <id>]`
    WriteMsr(Vec<String>),
    /// `!measure [default]`
    Measure { use_defaults: bool },
    /// `load vmm`
    LoadVmm,
    /// `unload`
    Unload,
    /// `.attach pid <hex> tid <hex>`
    Attach { pid: u32, tid: u32 },
    /// `.start path <image> [arguments]`
    Start { path: String, arguments: Option<String> },
    /// `.detach`
    Detach,
    /// `.kill [pid <hex>]`
    Kill(Option<u32>),
    /// `.switch <id>`
    Switch(u64),
    /// `pause`
    Pause,
    /// `g`
    Go,
    /// `.threads`
    Threads,
    /// `r`
    Registers,
    /// `events [e|d|c <tag>]`
    Events(EventsAction),
    /// `test`
    Test,
    /// Show help
    Help,
    /// Quit application
    Quit,
    /// Unknown or malformed command
    Unknown(String),
}

/// Parse a command string into AppCommand
pub fn parse_command(input: &str) -> AppCommand {
    let input = input.trim();
    let tokens: Vec<&str> = input.split_whitespace().collect();
    let Some(first) = tokens.first() else {
        return AppCommand::Unknown(String::new());
    };
    let name = first.to_ascii_lowercase();

    if let Some(kind) = TrapKind::from_command(&name) {
        return AppCommand::Event {
            kind,
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        };
    }

    match name.as_str() {
        "wrmsr" => AppCommand::WriteMsr(tokens.iter().map(|t| t.to_string()).collect()),
        "!measure" => match tokens.get(1..) {
            Some([]) | None => AppCommand::Measure { use_defaults: false },
            Some([arg]) if arg.eq_ignore_ascii_case("default") => AppCommand::Measure { use_defaults: true },
            _ => usage(input, "!measure [default]"),
        },
        "load" => match tokens.get(1) {
            Some(target) if target.eq_ignore_ascii_case("vmm") && tokens.len() == 2 => AppCommand::LoadVmm,
            _ => usage(input, "load vmm"),
        },
        "unload" => AppCommand::Unload,
        ".attach" => parse_attach(input, &tokens),
        ".start" => parse_start(input),
        ".detach" => AppCommand::Detach,
        ".kill" => match tokens.as_slice() {
            [_] => AppCommand::Kill(None),
            [_, keyword, pid] if keyword.eq_ignore_ascii_case("pid") => match parse_hex_u32(pid) {
                Some(pid) => AppCommand::Kill(Some(pid)),
                None => usage(input, ".kill [pid <hex>]"),
            },
            _ => usage(input, ".kill [pid <hex>]"),
        },
        ".switch" => match tokens.get(1).and_then(|t| parse_hex_u64(t)) {
            Some(id) if tokens.len() == 2 => AppCommand::Switch(id),
            _ => usage(input, ".switch <id>"),
        },
        "pause" => AppCommand::Pause,
        "g" | "go" => AppCommand::Go,
        ".threads" => AppCommand::Threads,
        "r" | "regs" => AppCommand::Registers,
        "events" => parse_events(input, &tokens),
        "test" => AppCommand::Test,
        "?" | "help" | ".help" => AppCommand::Help,
        "q" | "quit" | "exit" => AppCommand::Quit,
        _ => AppCommand::Unknown(input.to_string()),
    }
}

fn usage(input: &str, syntax: &str) -> AppCommand {
    AppCommand::Unknown(format!("{} (syntax: {})", input, syntax))
}

fn parse_attach(input: &str, tokens: &[&str]) -> AppCommand {
    let mut pid = None;
    let mut tid = None;
    let mut rest = tokens.iter().skip(1);

    while let Some(keyword) = rest.next() {
        let value = rest.next().and_then(|v| parse_hex_u32(v));
        match keyword.to_ascii_lowercase().as_str() {
            "pid" if pid.is_none() => pid = value,
            "tid" if tid.is_none() => tid = value,
            _ => return usage(input, ".attach pid <hex> tid <hex>"),
        }
    }

    match (pid, tid) {
        (Some(pid), Some(tid)) => AppCommand::Attach { pid, tid },
        _ => usage(input, ".attach pid <hex> tid <hex>"),
    }
}

/// `.start path <image> [arguments...]`, arguments kept verbatim
fn parse_start(input: &str) -> AppCommand {
    let rest = input[".start".len()..].trim_start();
    let Some(after_keyword) = rest
        .get(..4)
        .filter(|k| k.eq_ignore_ascii_case("path") && rest[4..].starts_with(char::is_whitespace))
        .map(|_| rest[4..].trim_start())
    else {
        return usage(input, ".start path <image> [arguments]");
    };

    let mut parts = after_keyword.splitn(2, char::is_whitespace);
    match parts.next().filter(|p| !p.is_empty()) {
        Some(path) => AppCommand::Start {
            path: path.to_string(),
            arguments: parts.next().map(str::trim).filter(|a| !a.is_empty()).map(String::from),
        },
        None => usage(input, ".start path <image> [arguments]"),
    }
}

fn parse_events(input: &str, tokens: &[&str]) -> AppCommand {
    match tokens {
        [_] => AppCommand::Events(EventsAction::List),
        [_, action, tag] => {
            let Some(tag) = parse_hex_u64(tag) else {
                return usage(input, "events [e|d|c <tag>]");
            };
            match action.to_ascii_lowercase().as_str() {
                "e" => AppCommand::Events(EventsAction::Enable(tag)),
                "d" => AppCommand::Events(EventsAction::Disable(tag)),
                "c" => AppCommand::Events(EventsAction::Clear(tag)),
                _ => usage(input, "events [e|d|c <tag>]"),
            }
        }
        _ => usage(input, "events [e|d|c <tag>]"),
    }
}
