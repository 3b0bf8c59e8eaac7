//! UI module - Command Line Interface
//!
//! A reedline-based REPL over the controller commands.

pub mod cli;
