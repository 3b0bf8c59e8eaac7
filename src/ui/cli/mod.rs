//! CLI - reedline-based REPL interface
//!
//! Reads controller commands, runs them against the [`AppState`] and prints
//! the outcome. Failures are reported and the loop keeps going.

use crate::app::{parse_command, AppCommand, AppState, EventsAction};
use anyhow::{anyhow, Result};
use colored::Colorize;
use hyperctl::debug::GuestRegisters;
use hyperctl::expr::RegisterExpression;
use hyperctl::measure::{measure, TimingStats};
use hyperctl::pipeline::submit_command;
use hyperctl::transport::{clear_event, set_event_enabled, write_msr, MsrRequest};
use reedline::{Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline, Signal};
use std::borrow::Cow;
use std::path::Path;

/// Prompt showing the device state and the focused debuggee
pub struct HyperctlPrompt {
    device_loaded: bool,
    debuggee: Option<(u32, u32)>,
}

impl HyperctlPrompt {
    pub fn new() -> Self {
        Self {
            device_loaded: false,
            debuggee: None,
        }
    }

    pub fn update(&mut self, state: &AppState) {
        self.device_loaded = state.session.has_device();
        self.debuggee = state.current_thread().map(|t| (t.process_id, t.thread_id));
    }
}

impl Default for HyperctlPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for HyperctlPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        let name = if self.device_loaded { "hyperctl" } else { "hyperctl (not loaded)" };
        match self.debuggee {
            Some((pid, tid)) => Cow::Owned(format!("{} ({:x}:{:x})", name, pid, tid)),
            None => Cow::Borrowed(name),
        }
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("> ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(&self, history_search: PromptHistorySearch) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "(failed) ",
        };
        Cow::Owned(format!("(search: {}{}) ", prefix, history_search.term))
    }
}

/// Whether the REPL keeps reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Print the help message
fn print_help() {
    println!("{}", "hyperctl commands".bold().cyan());
    println!("{}", "═".repeat(60).cyan());

    println!("\n{}", "Events:".bold().yellow());
    println!(
        "  {}  Trace a process",
        "!trace u|k|uk pid <hex> [core <hex>] [imm yes|no] [sc on|off]".green()
    );
    println!("  {}  Intercept rdmsr / wrmsr", "!msrread|!msrwrite [msr] [pid <hex>] ...".green());
    println!("  {}  Intercept cpuid", "!cpuid [pid <hex>] [core <hex>] ...".green());
    println!(
        "    actions: {}, {}, {} (break is implied without code or script)",
        "break".green(),
        "code { hex }".green(),
        "script { ... }".green()
    );
    println!("    gate: {}", "condition { hex }".green());
    println!("  {}            List events", "events".green());
    println!("  {}  Enable, disable or clear an event", "events e|d|c <tag>".green());

    println!("\n{}", "Hypervisor:".bold().yellow());
    println!("  {}          Open the hypervisor device", "load vmm".green());
    println!("  {}            Close the hypervisor device", "unload".green());
    println!("  {}  Write an MSR", "wrmsr <msr> <value> [core <hex>]".green());
    println!("  {}  Transparency measurements (deprecated)", "!measure [default]".green());

    println!("\n{}", "Debuggee:".bold().yellow());
    println!("  {}  Attach to a thread", ".attach pid <hex> tid <hex>".green());
    println!("  {}  Start a process", ".start path <image> [args]".green());
    println!("  {}       Focus another debuggee", ".switch <id>".green());
    println!("  {}  Pause, continue, registers", "pause / g / r".green());
    println!("  {}  Detach, kill", ".detach / .kill [pid <hex>]".green());
    println!("  {}          List debuggees", ".threads".green());

    println!("\n{}", "Other:".bold().yellow());
    println!("  {}              Test process handshake", "test".green());
    println!("  {}                 Show this help", "?".green());
    println!("  {}                 Quit", "q".green());
}

fn print_stats(name: &str, stats: &TimingStats) {
    println!(
        "    {:<6} average {:#x}, standard deviation {:#x}, median {:#x}",
        name, stats.average, stats.standard_deviation, stats.median
    );
}

fn print_registers(registers: &GuestRegisters) {
    for pair in GuestRegisters::NAMES.chunks(2) {
        let line: Vec<String> = pair
            .iter()
            .map(|name| format!("{:>6} = {:016x}", name, registers.get(name).unwrap_or_default()))
            .collect();
        println!("    {}", line.join("   "));
    }
}

fn focused(state: &AppState) -> Result<u64> {
    state
        .current
        .filter(|&id| state.debuggees.get(id).is_some())
        .ok_or_else(|| anyhow!("no debuggee is selected, use '.attach' or '.start' first"))
}

/// Execute a parsed command
pub fn execute_command(state: &mut AppState, cmd: AppCommand) -> Result<Flow> {
    match cmd {
        AppCommand::Event { kind, tokens } => {
            let registers = state.current_registers();
            let resolver = match registers.as_ref() {
                Some(registers) => RegisterExpression::new(registers),
                None => RegisterExpression::without_registers(),
            };
            let tag = submit_command(&mut state.session, kind, &tokens, &resolver)?;
            println!("{} {} event registered, tag {:#x}", "[+]".green(), kind, tag);
        }
        AppCommand::WriteMsr(tokens) => {
            let registers = state.current_registers();
            let resolver = match registers.as_ref() {
                Some(registers) => RegisterExpression::new(registers),
                None => RegisterExpression::without_registers(),
            };
            let request = MsrRequest::parse(&tokens, &resolver)?;
            write_msr(&mut state.session, &request)
                .map_err(|e| anyhow!("{}, either msr index or core id is invalid", e))?;
        }
        AppCommand::Measure { use_defaults } => {
            let measured = measure(&mut state.session, use_defaults)?;
            println!("{} the measurements were successful", "[+]".green());
            print_stats("cpuid", &measured.cpuid);
            print_stats("rdtsc", &measured.rdtsc);
        }
        AppCommand::LoadVmm => {
            state.session.open_hypervisor_device()?;
            println!("{} hypervisor device loaded", "[+]".green());
        }
        AppCommand::Unload => {
            state.session.unload()?;
            println!("[*] hypervisor device unloaded");
        }
        AppCommand::Attach { pid, tid } => {
            let id = state.debuggees.attach(&mut state.session, pid, tid, None, None)?;
            state.current = Some(id);
            println!("{} attached, debugging id {:#x}", "[+]".green(), id);
        }
        AppCommand::Start { path, arguments } => {
            let id = state
                .debuggees
                .start(&mut state.session, Path::new(&path), arguments.as_deref())?;
            state.current = Some(id);
            println!("{} started {}, debugging id {:#x}", "[+]".green(), path, id);
        }
        AppCommand::Detach => {
            let id = focused(state)?;
            state.debuggees.detach(&mut state.session, id)?;
            state.current = None;
            println!("[*] detached");
        }
        AppCommand::Kill(pid) => {
            let pid = match pid {
                Some(pid) => pid,
                None => {
                    let id = focused(state)?;
                    state.debuggees.get(id).map(|t| t.process_id).unwrap_or_default()
                }
            };
            let killed = state.debuggees.kill(pid)?;
            if state.current.is_some_and(|id| killed.iter().any(|t| t.unique_debugging_id == id)) {
                state.current = None;
            }
            println!("[*] process {:#x} terminated ({} thread(s))", pid, killed.len());
        }
        AppCommand::Switch(id) => {
            let thread = state
                .debuggees
                .get(id)
                .ok_or_else(|| anyhow!("debugging id {:#x} is not tracked", id))?;
            println!("[*] switched to pid {:#x} tid {:#x}", thread.process_id, thread.thread_id);
            state.current = Some(id);
        }
        AppCommand::Pause => {
            let id = focused(state)?;
            let thread = state.debuggees.pause(id)?;
            println!("[*] paused at {:#x}", thread.registers.rip);
        }
        AppCommand::Go => {
            let id = focused(state)?;
            state.debuggees.resume(id)?;
        }
        AppCommand::Threads => {
            if state.debuggees.is_empty() {
                println!("    {}", "(no debuggee)".dimmed());
            }
            for thread in state.debuggees.iter() {
                let marker = if state.current == Some(thread.unique_debugging_id) { "*" } else { " " };
                println!(
                    "  {} {:#x}  pid {:#x}  tid {:#x}  {}{}",
                    marker,
                    thread.unique_debugging_id,
                    thread.process_id,
                    thread.thread_id,
                    thread.state,
                    if thread.is_32bit { "  (32-bit)" } else { "" }
                );
            }
        }
        AppCommand::Registers => {
            let id = focused(state)?;
            let registers = state
                .current_registers()
                .ok_or_else(|| anyhow!("debuggee {:#x} is running, 'pause' it first", id))?;
            print_registers(&registers);
        }
        AppCommand::Events(action) => execute_events(state, action)?,
        AppCommand::Test => run_test_channel()?,
        AppCommand::Help => print_help(),
        AppCommand::Quit => {
            println!("[*] Shutting down...");
            return Ok(Flow::Quit);
        }
        AppCommand::Unknown(input) => {
            println!("{} Unknown command: '{}'", "[!]".red(), input);
            println!("    Type '?' for help");
        }
    }
    Ok(Flow::Continue)
}

fn execute_events(state: &mut AppState, action: EventsAction) -> Result<()> {
    match action {
        EventsAction::List => {
            let mut any = false;
            for registered in state.session.registered_events() {
                any = true;
                let event = &registered.event;
                let status = if registered.enabled { "enabled".green() } else { "disabled".yellow() };
                println!(
                    "  {:#x}  {}  {:?}  pid {:#x}  core {:#x}  {:?}  {}",
                    registered.tag,
                    event.kind,
                    event.mode,
                    event.process.raw(),
                    event.core.raw(),
                    registered.actions.kinds(),
                    status
                );
            }
            for tag in state.session.orphaned_events() {
                any = true;
                println!("  {:#x}  {}", tag, "orphaned (left in the kernel, clear it with 'events c')".red());
            }
            if !any {
                println!("    {}", "(no events)".dimmed());
            }
        }
        EventsAction::Enable(tag) => set_event_enabled(&mut state.session, tag, true)?,
        EventsAction::Disable(tag) => set_event_enabled(&mut state.session, tag, false)?,
        EventsAction::Clear(tag) => {
            clear_event(&mut state.session, tag)?;
            println!("[*] event {:#x} cleared", tag);
        }
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn run_test_channel() -> Result<()> {
    use hyperctl::selftest::{self, pipe::NamedPipeServer};

    let pipe = NamedPipeServer::create(selftest::TEST_PIPE_NAME)?;
    let mut child = selftest::open_test_process(&[selftest::TEST_PROCESS_ARGUMENT])?;
    pipe.wait_for_client()?;

    let result = selftest::server_handshake(pipe);
    let _ = child.kill();
    result?;
    println!("{} handshake with the test process succeeded", "[+]".green());
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn run_test_channel() -> Result<()> {
    Err(anyhow!("the test channel is a Windows named pipe"))
}

/// Parse and execute one line; failures are printed, not returned
pub fn execute_line(state: &mut AppState, line: &str) -> Flow {
    let input = line.trim();
    if input.is_empty() {
        return Flow::Continue;
    }

    match execute_command(state, parse_command(input)) {
        Ok(flow) => flow,
        Err(err) => {
            log::debug!("command '{}' failed: {:?}", input, err);
            println!("{} {:#}", "err,".red(), err);
            Flow::Continue
        }
    }
}

/// Run the CLI REPL
pub fn run_cli(state: &mut AppState) -> Result<()> {
    let mut line_editor = Reedline::create();
    let mut prompt = HyperctlPrompt::new();

    println!(
        "{}",
        "╔══════════════════════════════════════════════════════════════╗".cyan()
    );
    println!(
        "{}",
        "║  hyperctl - Type '?' for help, 'q' to quit                   ║".cyan()
    );
    println!(
        "{}",
        "╚══════════════════════════════════════════════════════════════╝".cyan()
    );

    loop {
        prompt.update(state);
        let sig = line_editor.read_line(&prompt)?;
        match sig {
            Signal::Success(buffer) => {
                if execute_line(state, &buffer) == Flow::Quit {
                    break;
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                println!("\n[*] Interrupted");
                break;
            }
        }
    }

    Ok(())
}
