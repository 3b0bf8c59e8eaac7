//! App module - console state and commands
//!
//! Provides the state and command parsing the REPL works on.

mod commands;
mod state;

pub use commands::*;
pub use state::*;
