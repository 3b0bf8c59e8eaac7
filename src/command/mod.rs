//! Command module - token clauses shared by the event builder and the action registry
//!
//! A command such as `!trace u pid 1c0 script { ... }` arrives as whitespace-split
//! tokens. [`clause::scan`] groups them into words, keyword/value pairs and
//! bracket blocks once, so both parsers agree on which tokens belong together.

pub mod clause;

pub use clause::{decode_hex_block, scan, Clause};

use thiserror::Error;

/// Why an event or action specification was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParsingErrorCause {
    #[error("couldn't resolve error at '{0}'")]
    InvalidSyntax(String),

    #[error("mode '{second}' conflicts with the previously specified mode '{first}'")]
    ConflictingModeFlag { first: String, second: String },

    #[error("please specify the mode(s) that you want to intercept their execution (u, k, ku)")]
    MissingModeFlag,

    #[error("this event only applies to the selected process(es), please specify the 'pid' of the target process")]
    MissingProcessScope,

    #[error("please specify a correct hex value for core id")]
    MissingCoreScope,

    #[error("couldn't resolve '{0}' as a hex value or an expression")]
    UnresolvedExpression(String),

    #[error("malformed '{0}' block, expected '{{ ... }}' with balanced braces")]
    MalformedBracketBlock(String),
}
