//! hyperctl - hypervisor-assisted debugger controller
//!
//! Entry point that handles argument parsing, optional device loading and
//! scripted commands before handing over to the REPL.

mod app;
mod ui;

use app::AppState;
use clap::Parser;
use ui::cli::{execute_line, run_cli, Flow};

/// hyperctl: controller for a hypervisor-assisted debugger
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Open the hypervisor device on startup (same as 'load vmm')
    #[arg(short, long, default_value_t = false)]
    load: bool,

    /// Command to run before the REPL starts, may be repeated
    #[arg(short, long = "command", value_name = "COMMAND")]
    commands: Vec<String>,

    /// Run the scripted commands and exit without starting the REPL
    #[arg(long, default_value_t = false)]
    headless: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }))
    .init();

    log::debug!("Arguments: {:?}", args);
    println!("[*] hyperctl v{}", env!("CARGO_PKG_VERSION"));

    let mut state = AppState::new();

    if args.load {
        execute_line(&mut state, "load vmm");
    }

    let mut quit = false;
    for command in &args.commands {
        log::info!("Running scripted command: {}", command);
        if execute_line(&mut state, command) == Flow::Quit {
            quit = true;
            break;
        }
    }

    if !quit && !args.headless {
        if let Err(e) = run_cli(&mut state) {
            log::error!("CLI Error: {}", e);
        }
    }

    state.session.teardown();
    Ok(())
}
