//! Shared application state
//!
//! The session, the debuggee store and the debuggee the console is focused on.

use hyperctl::debug::{ActiveDebuggingThread, DebuggeeManager, GuestRegisters, PlatformProcessControl};
use hyperctl::Session;

/// Shared application state
pub struct AppState {
    /// Device handle and registered events
    pub session: Session,
    /// Tracked usermode debuggees
    pub debuggees: DebuggeeManager<PlatformProcessControl>,
    /// Debugging id that `pause`, `g`, `r` and `.detach` act on
    pub current: Option<u64>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            session: Session::new(),
            debuggees: DebuggeeManager::new(PlatformProcessControl::new()),
            current: None,
        }
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The focused debuggee, if it is still tracked
    pub fn current_thread(&self) -> Option<&ActiveDebuggingThread> {
        self.current.and_then(|id| self.debuggees.get(id))
    }

    /// Registers of the focused debuggee while it is paused
    pub fn current_registers(&self) -> Option<GuestRegisters> {
        self.current_thread().filter(|t| t.is_paused).map(|t| t.registers)
    }
}
