//! Payload - owned descriptor buffers with release accounting
//!
//! Condition bytes, custom code and script bodies all live in [`Payload`] values.
//! Every creation and every drop is counted on a per-thread ledger so the
//! "released exactly once" contract of the descriptor pipeline can be checked
//! on any path, including the failure ones.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;

thread_local! {
    static ALLOCATED: Cell<u64> = const { Cell::new(0) };
    static RELEASED: Cell<u64> = const { Cell::new(0) };
}

/// Snapshot of the per-thread payload ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadLedger {
    /// Payloads created on this thread
    pub allocated: u64,
    /// Payloads dropped on this thread
    pub released: u64,
}

impl PayloadLedger {
    /// Payloads still owned by someone
    pub fn live(&self) -> u64 {
        self.allocated.saturating_sub(self.released)
    }

    /// Counts accumulated since an earlier snapshot
    pub fn since(&self, earlier: PayloadLedger) -> PayloadLedger {
        PayloadLedger {
            allocated: self.allocated - earlier.allocated,
            released: self.released - earlier.released,
        }
    }
}

/// Read the ledger for the current thread
pub fn ledger() -> PayloadLedger {
    PayloadLedger {
        allocated: ALLOCATED.with(Cell::get),
        released: RELEASED.with(Cell::get),
    }
}

/// An owned descriptor byte buffer
#[derive(PartialEq, Eq)]
pub struct Payload {
    bytes: Box<[u8]>,
}

impl Payload {
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Self {
        ALLOCATED.with(|c| c.set(c.get() + 1));
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Clone for Payload {
    fn clone(&self) -> Self {
        Self::new(self.bytes.clone())
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        RELEASED.with(|c| c.set(c.get() + 1));
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes: {})", self.bytes.len(), hex::encode(&self.bytes))
    }
}
