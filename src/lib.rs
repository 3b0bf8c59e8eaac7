//! hyperctl - controller side of a hypervisor-assisted debugger
//!
//! Builds execution-interception event descriptors, attaches actions to them and
//! registers both with the kernel-resident interception engine. Attached usermode
//! threads are tracked by the debuggee state machine in [`debug`].

pub mod action;
pub mod command;
pub mod debug;
pub mod event;
pub mod expr;
pub mod measure;
pub mod payload;
pub mod pipeline;
pub mod selftest;
pub mod session;
pub mod transport;

pub use session::Session;
